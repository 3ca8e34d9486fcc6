//! Unified error handling for the seedsched crate
//!
//! Every fallible operation in the crate returns [`Error`]. The type is
//! `Clone` so a single terminal outcome can be handed to every peer waiting on
//! a task's first seed.
//!
//! # Architecture
//!
//! - [`Code`] - Numeric result codes shared with the scheduler wire protocol
//! - [`Error`] - Error enum carrying a code-compatible classification
//!
//! # Usage
//!
//! ```rust,ignore
//! use seedsched::error::{Code, Error};
//!
//! fn handle(err: &Error) {
//!     if err.is_migratable() {
//!         // move the routing key to another scheduler
//!     }
//!     tracing::warn!(code = err.code().as_i32(), error = %err, "call failed");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result codes exchanged with schedulers and CDN nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Success,
    ServerUnavailable,
    UnknownError,
    ResourceLacked,
    NotFound,
    SchedNeedBackSource,
    CdnError,
    CdnTaskNotFound,
}

impl Code {
    /// Numeric value used in logs and on the wire
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Success => 200,
            Self::ServerUnavailable => 500,
            Self::UnknownError => 1000,
            Self::ResourceLacked => 1001,
            Self::NotFound => 1404,
            Self::SchedNeedBackSource => 5001,
            Self::CdnError => 6000,
            Self::CdnTaskNotFound => 6404,
        }
    }

    /// Look up a code from its numeric value
    pub fn from_i32(value: i32) -> Option<Self> {
        [
            Self::Success,
            Self::ServerUnavailable,
            Self::UnknownError,
            Self::ResourceLacked,
            Self::NotFound,
            Self::SchedNeedBackSource,
            Self::CdnError,
            Self::CdnTaskNotFound,
        ]
        .into_iter()
        .find(|code| code.as_i32() == value)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

/// Error type for the seedsched crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No reachable backend for a routing key
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    /// Failure surfaced from a CDN seed stream
    #[error("cdn error: {0}")]
    Cdn(String),

    /// No CDN is configured; the peer should fetch from the source directly
    #[error("need back source: {0}")]
    NeedBackSource(String),

    /// Unknown entity (seeder, source scheme, task)
    #[error("not found: {0}")]
    NotFound(String),

    /// Typed error returned by a remote scheduler or CDN
    #[error("rpc error {code}: {message}")]
    Rpc { code: Code, message: String },

    /// Out-of-band HTTP fetch failure
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a typed remote error
    pub fn rpc(code: Code, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Result code of this error; untyped failures report `UnknownError`
    pub fn code(&self) -> Code {
        match self {
            Self::ServerUnavailable(_) => Code::ServerUnavailable,
            Self::Cdn(_) => Code::CdnError,
            Self::NeedBackSource(_) => Code::SchedNeedBackSource,
            Self::NotFound(_) => Code::NotFound,
            Self::Rpc { code, .. } => *code,
            Self::Fetch(_) | Self::Config(_) | Self::Io(_) | Self::Other(_) => Code::UnknownError,
        }
    }

    /// Wrap as a CDN error unless the error already carries a CDN-level type
    pub fn into_cdn(self) -> Self {
        match self {
            Self::Cdn(_) | Self::Rpc { .. } | Self::NeedBackSource(_) => self,
            other => Self::Cdn(other.to_string()),
        }
    }

    /// Check if the error may succeed on a retry against the same node
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ServerUnavailable(_) | Self::Fetch(_) | Self::Io(_) | Self::Other(_) => true,
            Self::Rpc { code, .. } => matches!(
                code,
                Code::ServerUnavailable | Code::UnknownError | Code::ResourceLacked
            ),
            Self::Cdn(_) | Self::NeedBackSource(_) | Self::NotFound(_) | Self::Config(_) => false,
        }
    }

    /// Check if the routing key should move to another node after this error
    pub fn is_migratable(&self) -> bool {
        matches!(
            self.code(),
            Code::ServerUnavailable | Code::ResourceLacked | Code::UnknownError
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {err}"))
    }
}

/// Result type alias using the crate Error type
pub type Result<T> = std::result::Result<T, Error>;
