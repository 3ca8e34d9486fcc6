//! CDN seeding
//!
//! - [`client`] - Seed stream transport interface
//! - [`manager`] - Per-task seeding and first-seed fan-out
//! - [`tiny`] - Inline content fetch for tiny tasks

pub mod client;
pub mod manager;
pub mod tiny;

pub use client::{CdnClient, PieceSeed, SeedRequest, SeedStream};
pub use manager::{CdnManager, TriggerCallback};
pub use tiny::TinyFileClient;
