//! Resilient access to the scheduler cluster
//!
//! - [`types`] - Messages exchanged with schedulers
//! - [`connection`] - Node transport traits and the key-to-node [`NodePool`]
//! - [`client`] - [`SchedulerClient`] with retry and node migration
//! - [`stream`] - Migrating piece result stream

pub mod client;
pub mod connection;
pub mod stream;
pub mod types;

pub use client::SchedulerClient;
pub use connection::{ConnectionRouter, NodePool, PieceResultChannel, SchedulerNode};
pub use stream::PeerPacketStream;
pub use types::{
    DestPeer, DirectPiece, PeerHost, PeerPacket, PeerResult, PeerTarget, PeerTaskRequest,
    PieceResult, RegisterResult, UrlMeta, BEGIN_OF_PIECE,
};
