//! Dynamic configuration
//!
//! Holds the current CDN server snapshot and pushes every new snapshot to the
//! registered observers. A snapshot always replaces the previous one as a
//! whole; observers never see a partial merge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CdnServer, Config};
use crate::error::Result;

/// Snapshot of the dynamic part of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynconfigData {
    pub cdns: Vec<CdnServer>,
}

impl From<&Config> for DynconfigData {
    fn from(config: &Config) -> Self {
        Self {
            cdns: config.cdn.servers.clone(),
        }
    }
}

/// Receives every new configuration snapshot
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_notify(&self, data: &DynconfigData);
}

/// Current configuration snapshot plus its observers
pub struct Dynconfig {
    data: RwLock<DynconfigData>,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl Dynconfig {
    pub fn new(data: DynconfigData) -> Self {
        Self {
            data: RwLock::new(data),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Current snapshot
    pub async fn get(&self) -> DynconfigData {
        self.data.read().await.clone()
    }

    /// Add an observer; it is called on every later `notify`
    pub async fn register(&self, observer: Arc<dyn Observer>) {
        self.observers.write().await.push(observer);
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Replace the snapshot and notify every observer in registration order
    pub async fn notify(&self, data: DynconfigData) {
        *self.data.write().await = data.clone();

        let observers = self.observers.read().await.clone();
        tracing::info!(
            cdns = data.cdns.len(),
            observers = observers.len(),
            "Dynamic config updated"
        );

        for observer in observers {
            observer.on_notify(&data).await;
        }
    }

    /// Re-read a TOML config file and publish its CDN list
    pub async fn reload_from_file(&self, path: &Path) -> Result<()> {
        let config = Config::from_file(path)?;
        config.validate()?;
        self.notify(DynconfigData::from(&config)).await;
        Ok(())
    }
}
