//! Scheduler node handles and key-to-node routing

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::{PeerPacket, PeerResult, PeerTarget, PeerTaskRequest, PieceResult, RegisterResult};
use crate::error::{Error, Result};

// ============================================================================
// Transport Traits
// ============================================================================

/// Connection to one scheduler node
#[async_trait]
pub trait SchedulerNode: Send + Sync {
    /// Node address, unique within a pool
    fn target(&self) -> &str;

    async fn register_peer_task(&self, request: &PeerTaskRequest) -> Result<RegisterResult>;

    /// Open the bidirectional piece result channel for a task
    async fn report_piece_result(
        &self,
        task_id: &str,
        request: &PeerTaskRequest,
    ) -> Result<Box<dyn PieceResultChannel>>;

    async fn report_peer_result(&self, result: &PeerResult) -> Result<()>;

    async fn leave_task(&self, target: &PeerTarget) -> Result<()>;
}

/// Open piece result channel on one node
#[async_trait]
pub trait PieceResultChannel: Send {
    async fn send(&mut self, result: PieceResult) -> Result<()>;

    /// Next parent assignment; `None` once the scheduler closed the channel
    async fn recv(&mut self) -> Result<Option<PeerPacket>>;
}

/// Maps routing keys to scheduler nodes
#[async_trait]
pub trait ConnectionRouter: Send + Sync {
    /// Node serving `key`
    ///
    /// With `stick` set only an existing binding is returned; otherwise an
    /// unbound key is assigned a node.
    async fn resolve(&self, key: &str, stick: bool) -> Result<Arc<dyn SchedulerNode>>;

    /// Rebind `key` to a node outside `excluded` and its current node
    ///
    /// Returns the node the key was moved away from.
    async fn migrate(&self, key: &str, excluded: &[String]) -> Result<String>;

    /// Make `new_key` resolve to the node serving `old_key`
    async fn correct_key(&self, old_key: &str, new_key: &str);
}

// ============================================================================
// Node Pool
// ============================================================================

#[derive(Default)]
struct PoolState {
    nodes: HashMap<String, Arc<dyn SchedulerNode>>,
    bindings: HashMap<String, String>,
}

impl PoolState {
    /// Best node for `key` among those not excluded, by rendezvous hashing
    fn pick(&self, key: &str, excluded: &[&str]) -> Option<String> {
        self.nodes
            .keys()
            .filter(|node| !excluded.contains(&node.as_str()))
            .max_by(|a, b| {
                rendezvous_score(key, a)
                    .cmp(&rendezvous_score(key, b))
                    .then_with(|| b.cmp(a))
            })
            .cloned()
    }
}

/// Rendezvous hashing weight of a node for a key
fn rendezvous_score(key: &str, node: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"/");
    hasher.update(node.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Fixed set of scheduler nodes with sticky key bindings
pub struct NodePool {
    state: RwLock<PoolState>,
}

impl NodePool {
    pub fn new(nodes: Vec<Arc<dyn SchedulerNode>>) -> Self {
        let state = PoolState {
            nodes: nodes
                .into_iter()
                .map(|node| (node.target().to_string(), node))
                .collect(),
            bindings: HashMap::new(),
        };

        Self {
            state: RwLock::new(state),
        }
    }

    /// Replace the node set; keys bound to removed nodes become unbound
    pub async fn update_nodes(&self, nodes: Vec<Arc<dyn SchedulerNode>>) {
        let mut state = self.state.write().await;
        state.nodes = nodes
            .into_iter()
            .map(|node| (node.target().to_string(), node))
            .collect();

        let PoolState { nodes, bindings } = &mut *state;
        let before = bindings.len();
        bindings.retain(|_, target| nodes.contains_key(target));

        tracing::info!(
            nodes = nodes.len(),
            dropped_bindings = before - bindings.len(),
            "Scheduler node set updated"
        );
    }

    /// Node currently bound to `key`
    pub async fn node_for(&self, key: &str) -> Option<String> {
        self.state.read().await.bindings.get(key).cloned()
    }

    /// Addresses of all nodes, sorted
    pub async fn targets(&self) -> Vec<String> {
        let mut targets: Vec<_> = self.state.read().await.nodes.keys().cloned().collect();
        targets.sort();
        targets
    }
}

#[async_trait]
impl ConnectionRouter for NodePool {
    async fn resolve(&self, key: &str, stick: bool) -> Result<Arc<dyn SchedulerNode>> {
        {
            let state = self.state.read().await;
            if let Some(node) = state
                .bindings
                .get(key)
                .and_then(|target| state.nodes.get(target))
            {
                return Ok(Arc::clone(node));
            }
        }

        if stick {
            return Err(Error::ServerUnavailable(format!(
                "no scheduler bound to key {key}"
            )));
        }

        let mut state = self.state.write().await;
        if let Some(node) = state
            .bindings
            .get(key)
            .and_then(|target| state.nodes.get(target))
        {
            return Ok(Arc::clone(node));
        }

        let target = state
            .pick(key, &[])
            .ok_or_else(|| Error::ServerUnavailable("no scheduler nodes".to_string()))?;
        state.bindings.insert(key.to_string(), target.clone());

        tracing::debug!(key = %key, scheduler = %target, "Bound key to scheduler");
        state
            .nodes
            .get(&target)
            .cloned()
            .ok_or_else(|| Error::ServerUnavailable(format!("scheduler {target} vanished")))
    }

    async fn migrate(&self, key: &str, excluded: &[String]) -> Result<String> {
        let mut state = self.state.write().await;
        let previous = state.bindings.get(key).cloned().ok_or_else(|| {
            Error::ServerUnavailable(format!("no scheduler bound to key {key}"))
        })?;

        let mut skip: Vec<&str> = excluded.iter().map(String::as_str).collect();
        skip.push(previous.as_str());

        let next = state.pick(key, &skip).ok_or_else(|| {
            Error::ServerUnavailable(format!(
                "no scheduler left for key {key}, excluded {}",
                skip.len()
            ))
        })?;

        tracing::info!(key = %key, from = %previous, to = %next, "Migrated key");
        state.bindings.insert(key.to_string(), next);
        Ok(previous)
    }

    async fn correct_key(&self, old_key: &str, new_key: &str) {
        let mut state = self.state.write().await;
        if let Some(target) = state.bindings.get(old_key).cloned() {
            state.bindings.insert(new_key.to_string(), target);
        }
    }
}
