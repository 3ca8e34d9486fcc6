//! Scheduler message types
//!
//! Plain data carried by scheduler calls. The transport decides how these
//! are encoded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Code;
use crate::resource::SizeScope;

/// Piece number of the keep-alive result sent when a piece stream opens
pub const BEGIN_OF_PIECE: i32 = -1;

/// Metadata that, together with the URL, identifies a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMeta {
    /// Expected content digest, e.g. `sha256:...`
    #[serde(default)]
    pub digest: String,

    /// Free-form tag separating otherwise identical URLs
    #[serde(default)]
    pub tag: String,

    /// Byte range, e.g. `0-1023`
    #[serde(default)]
    pub range: String,

    /// `&`-separated query keys ignored when computing the task id
    #[serde(default)]
    pub filter: String,

    /// Request headers forwarded to the source
    #[serde(default)]
    pub header: HashMap<String, String>,
}

/// Network identity of a downloading peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHost {
    pub uuid: String,
    pub ip: String,
    pub rpc_port: u16,
    pub down_port: u16,
    pub host_name: String,
    #[serde(default)]
    pub security_domain: String,
    #[serde(default)]
    pub idc: String,
}

/// Request to register a peer task with a scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTaskRequest {
    pub url: String,
    #[serde(default)]
    pub url_meta: UrlMeta,
    pub peer_id: String,
    pub peer_host: PeerHost,
    #[serde(default)]
    pub biz_id: String,
}

/// Inline content of a tiny task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectPiece {
    /// Single piece descriptor for small tasks
    SinglePiece { dst_pid: String, piece_num: u32 },
    /// Literal task bytes for tiny tasks
    PieceContent(Vec<u8>),
}

/// Scheduler answer to a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    /// Canonical task id assigned by the scheduler
    pub task_id: String,
    pub size_scope: SizeScope,
    pub direct_piece: Option<DirectPiece>,
}

/// Outcome of downloading one piece, reported on the piece stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceResult {
    pub task_id: String,
    pub src_pid: String,
    pub dst_pid: String,
    pub piece_num: i32,
    pub success: bool,
    pub code: Code,
    /// Number of pieces the reporting peer has finished so far
    pub finished_count: u32,
}

impl PieceResult {
    /// Keep-alive result that asks the scheduler to start scheduling
    pub fn zero(task_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            src_pid: peer_id.into(),
            dst_pid: String::new(),
            piece_num: BEGIN_OF_PIECE,
            success: true,
            code: Code::Success,
            finished_count: 0,
        }
    }

    /// Whether this is the keep-alive result
    pub fn is_zero(&self) -> bool {
        self.piece_num == BEGIN_OF_PIECE
    }
}

/// Parent assignment pushed by the scheduler on the piece stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPacket {
    pub task_id: String,
    pub src_pid: String,
    pub main_peer: Option<DestPeer>,
    #[serde(default)]
    pub steal_peers: Vec<DestPeer>,
    pub code: Code,
}

/// A parent peer a child may download from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestPeer {
    pub ip: String,
    pub rpc_port: u16,
    pub peer_id: String,
}

/// Final report of a peer's download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerResult {
    pub task_id: String,
    pub peer_id: String,
    pub src_ip: String,
    pub url: String,
    pub content_length: i64,
    /// Bytes downloaded from other peers
    pub traffic: u64,
    /// Download time in milliseconds
    pub cost: u32,
    pub success: bool,
    pub code: Code,
}

/// Identifies a peer leaving a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTarget {
    pub task_id: String,
    pub peer_id: String,
}
