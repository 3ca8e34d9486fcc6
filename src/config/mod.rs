//! Configuration management for seedsched
//!
//! This module handles loading and validating configuration from TOML files
//! and environment variables. The CDN server list can change at runtime; see
//! [`dynconfig`] for the observer-based holder that distributes new snapshots.

pub mod dynconfig;

pub use dynconfig::{Dynconfig, DynconfigData, Observer};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler client configuration
    #[serde(default)]
    pub scheduler: SchedulerClientConfig,

    /// CDN seeding configuration
    #[serde(default)]
    pub cdn: CdnConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration of the resilient scheduler client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerClientConfig {
    /// Scheduler node addresses (`host:port`)
    pub nodes: Vec<String>,

    /// Retry policy for peer task registration
    pub register: RetryConfig,

    /// Retry policy for piece and peer result reports
    pub report: RetryConfig,

    /// Retry policy for leaving a task
    pub leave: RetryConfig,

    /// Maximum node migrations for one logical call
    pub max_migrations: u32,
}

impl Default for SchedulerClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            register: RetryConfig::new(5),
            report: RetryConfig::new(5),
            leave: RetryConfig::new(3),
            max_migrations: 8,
        }
    }
}

/// Network descriptor of a CDN seed node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CdnServer {
    /// Host name the CDN reports as seeder name
    pub host_name: String,

    pub ip: String,

    /// RPC port
    pub port: u16,

    /// Port serving piece downloads over HTTP
    pub download_port: u16,
}

impl CdnServer {
    /// Address of the RPC endpoint
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// CDN seeding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Initial CDN server list
    pub servers: Vec<CdnServer>,

    /// Timeout of the tiny file content fetch in milliseconds
    pub tiny_file_timeout_ms: u64,

    /// Delay in milliseconds before a failed task is removed
    pub failure_grace_ms: u64,

    /// Retry policy for opening a seed stream
    pub open_retry: RetryConfig,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            tiny_file_timeout_ms: 5_000,
            failure_grace_ms: 5_000,
            open_retry: RetryConfig::new(3),
        }
    }
}

impl CdnConfig {
    pub fn tiny_file_timeout(&self) -> Duration {
        Duration::from_millis(self.tiny_file_timeout_ms)
    }

    pub fn failure_grace(&self) -> Duration {
        Duration::from_millis(self.failure_grace_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SEEDSCHED_*` environment variables
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(nodes) = std::env::var("SEEDSCHED_SCHEDULER_NODES") {
            self.scheduler.nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(v) = env_parse::<u32>("SEEDSCHED_MAX_MIGRATIONS")? {
            self.scheduler.max_migrations = v;
        }

        if let Some(v) = env_parse::<u64>("SEEDSCHED_TINY_FILE_TIMEOUT_MS")? {
            self.cdn.tiny_file_timeout_ms = v;
        }

        if let Some(v) = env_parse::<u64>("SEEDSCHED_FAILURE_GRACE_MS")? {
            self.cdn.failure_grace_ms = v;
        }

        if let Ok(level) = std::env::var("SEEDSCHED_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("SEEDSCHED_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, retry) in [
            ("scheduler.register", &self.scheduler.register),
            ("scheduler.report", &self.scheduler.report),
            ("scheduler.leave", &self.scheduler.leave),
            ("cdn.open_retry", &self.cdn.open_retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(Error::config(format!(
                    "{name}.max_attempts must be greater than 0"
                )));
            }
            if retry.initial_backoff_ms > retry.max_backoff_ms {
                return Err(Error::config(format!(
                    "{name}.initial_backoff_ms must not exceed max_backoff_ms"
                )));
            }
            if retry.backoff_multiplier < 1.0 {
                return Err(Error::config(format!(
                    "{name}.backoff_multiplier must be at least 1.0"
                )));
            }
        }

        let mut names = HashSet::new();
        for server in &self.cdn.servers {
            if server.host_name.is_empty() || server.ip.is_empty() {
                return Err(Error::config("cdn server needs host_name and ip"));
            }
            if !names.insert(server.host_name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate cdn server host_name: {}",
                    server.host_name
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "logging.format must be text or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
