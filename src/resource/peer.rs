//! Peer tasks and the peer task registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::RwLock as AsyncRwLock;

use super::host::Host;
use super::task::Task;
use super::{read, write};
use crate::error::Error;
use crate::rpc::types::PieceResult;

/// Download state of a peer task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Registered, waiting for the task's first seed
    #[default]
    Waiting,
    /// Seeding started; the peer can be scheduled
    Running,
    /// Seeding failed; the peer must fetch from the source
    NeedBackSource,
    Success,
    Failed,
}

#[derive(Debug, Default)]
struct PeerState {
    host_id: Option<String>,
    status: PeerStatus,
    success: bool,
    piece_results: Vec<PieceResult>,
    finished_count: u32,
}

/// One peer's participation in downloading a task
#[derive(Debug)]
pub struct PeerTask {
    peer_id: String,
    task_id: String,
    created_at: DateTime<Utc>,
    state: RwLock<PeerState>,
}

impl PeerTask {
    pub fn new(peer_id: impl Into<String>, task_id: impl Into<String>, host_id: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            task_id: task_id.into(),
            created_at: Utc::now(),
            state: RwLock::new(PeerState {
                host_id,
                ..Default::default()
            }),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn host_id(&self) -> Option<String> {
        read(&self.state).host_id.clone()
    }

    /// Bind the host if none is bound yet; returns whether it was bound
    pub fn bind_host(&self, host_id: &str) -> bool {
        let mut state = write(&self.state);
        if state.host_id.is_some() {
            return false;
        }
        state.host_id = Some(host_id.to_string());
        true
    }

    /// Number of pieces finished; never decreases
    pub fn finished_count(&self) -> u32 {
        read(&self.state).finished_count
    }

    /// Append a piece result, raising the finished count if it is higher
    pub fn add_piece_result(&self, result: PieceResult) {
        let mut state = write(&self.state);
        state.finished_count = state.finished_count.max(result.finished_count);
        state.piece_results.push(result);
    }

    pub fn piece_results(&self) -> Vec<PieceResult> {
        read(&self.state).piece_results.clone()
    }

    pub fn mark_success(&self) {
        let mut state = write(&self.state);
        state.success = true;
        state.status = PeerStatus::Success;
    }

    pub fn is_success(&self) -> bool {
        read(&self.state).success
    }

    pub fn status(&self) -> PeerStatus {
        read(&self.state).status
    }

    pub fn set_status(&self, status: PeerStatus) {
        write(&self.state).status = status;
    }
}

/// Receives the outcome of a task's first seed for each waiting peer
pub trait PeerNotifier: Send + Sync {
    /// `err` is `None` once seeding started, or the terminal seeding error
    fn on_seed_result(&self, peer: &PeerTask, err: Option<&Error>);
}

/// Registry of peer tasks, keyed by peer id
pub struct PeerTaskManager {
    peers: AsyncRwLock<HashMap<String, Arc<PeerTask>>>,
}

impl PeerTaskManager {
    pub fn new() -> Self {
        Self {
            peers: AsyncRwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerTask>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Register a peer task; an existing entry with the same id is returned as is
    pub async fn add(&self, peer_id: &str, task: &Task, host: Option<&Host>) -> Arc<PeerTask> {
        let mut peers = self.peers.write().await;
        peers
            .entry(peer_id.to_string())
            .or_insert_with(|| {
                Arc::new(PeerTask::new(
                    peer_id,
                    task.task_id(),
                    host.map(|h| h.uuid.clone()),
                ))
            })
            .clone()
    }

    pub async fn delete(&self, peer_id: &str) -> Option<Arc<PeerTask>> {
        self.peers.write().await.remove(peer_id)
    }

    /// Remove every peer task of a task; returns how many were removed
    pub async fn delete_task(&self, task_id: &str) -> usize {
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|_, peer| peer.task_id() != task_id);
        before - peers.len()
    }

    pub async fn list_by_task(&self, task_id: &str) -> Vec<Arc<PeerTask>> {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.task_id() == task_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerNotifier for PeerTaskManager {
    fn on_seed_result(&self, peer: &PeerTask, err: Option<&Error>) {
        match err {
            None => {
                if peer.status() == PeerStatus::Waiting {
                    peer.set_status(PeerStatus::Running);
                }
            }
            Some(e) => {
                tracing::warn!(
                    peer_id = %peer.peer_id(),
                    task_id = %peer.task_id(),
                    error = %e,
                    "Seeding failed, peer falls back to source"
                );
                peer.set_status(PeerStatus::NeedBackSource);
            }
        }
    }
}
