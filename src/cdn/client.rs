//! CDN seed transport interface

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::CdnServer;
use crate::error::Result;
use crate::resource::Piece;
use crate::rpc::types::UrlMeta;

/// Request asking a CDN node to seed a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRequest {
    pub task_id: String,
    pub url: String,
    /// Query keys ignored when computing the task id
    pub filter: String,
    pub url_meta: UrlMeta,
}

/// One event on a seed stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceSeed {
    /// Peer id the CDN seeds under
    pub peer_id: String,
    /// Host name of the seeding CDN node
    pub seeder_name: String,
    /// Newly available piece; absent on the final event
    pub piece_info: Option<Piece>,
    /// Seeding finished
    pub done: bool,
    /// Total content length, valid once `done` is set
    pub content_length: i64,
    /// Piece count reported by the CDN, valid once `done` is set
    pub total_piece_count: i32,
}

/// Ordered seed events for one task
///
/// `Ok(None)` is an empty event and does not end the stream. An `Err` item
/// ends seeding for the task.
pub type SeedStream = BoxStream<'static, Result<Option<PieceSeed>>>;

/// Transport to the CDN seed nodes
#[async_trait]
pub trait CdnClient: Send + Sync {
    /// Open a seed stream for a task
    async fn obtain_seeds(&self, request: SeedRequest) -> Result<SeedStream>;

    /// Point the client at a new CDN server set
    fn update_state(&self, _servers: &[CdnServer]) {}
}
