//! seedsched - CDN seeding and resilient scheduler access for P2P distribution
//!
//! The coordination core of a peer-to-peer content distribution scheduler:
//! drive CDN seeding of a task once, stream piece availability into the
//! task and peer registries, and notify every peer waiting on the task's
//! first seed. A companion client reaches a pool of scheduler replicas with
//! bounded retries and automatic node migration.
//!
//! # Architecture
//!
//! - [`cdn`] - Seed stream consumption and first-seed fan-out
//! - [`resource`] - In-memory host, task and peer task registries
//! - [`rpc`] - Scheduler client, node routing and piece result streams
//! - [`config`] - Static configuration and dynamic CDN server updates
//! - [`source`] - Scheme-keyed back-to-source client registry
//! - [`idgen`] - Task, peer and host identifiers
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Retry with capped exponential backoff
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use seedsched::config::{Config, Dynconfig, DynconfigData};
//! use seedsched::resource::{HostManager, TaskManager};
//!
//! # async fn run(cdn_client: Arc<dyn seedsched::cdn::CdnClient>) -> seedsched::Result<()> {
//! let config = Config::from_env()?;
//! let dynconfig = Dynconfig::new(DynconfigData::from(&config));
//! let tasks = Arc::new(TaskManager::new());
//! let notifier = tasks.peer_tasks().clone();
//!
//! let _manager = seedsched::cdn::CdnManager::new(
//!     &config.cdn,
//!     &dynconfig,
//!     cdn_client,
//!     tasks,
//!     Arc::new(HostManager::new()),
//!     notifier,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod cdn;
pub mod config;
pub mod error;
pub mod idgen;
pub mod metrics;
pub mod resource;
pub mod rpc;
pub mod source;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cdn::{CdnClient, CdnManager, PieceSeed, SeedRequest, TriggerCallback};
    pub use crate::config::{CdnServer, Config, Dynconfig, DynconfigData};
    pub use crate::error::{Code, Error, Result};
    pub use crate::resource::{HostManager, PeerTask, SizeScope, Task, TaskManager};
    pub use crate::rpc::{NodePool, PeerPacketStream, SchedulerClient};
}

pub use error::{Error, Result};
