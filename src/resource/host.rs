//! Hosts and the host registry

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::CdnServer;
use crate::rpc::types::PeerHost;

/// Role of a host in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    /// CDN seed node
    Cdn,
    /// Regular downloading peer
    Peer,
}

/// A machine participating in distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub uuid: String,
    pub host_type: HostType,
    pub ip: String,
    pub rpc_port: u16,
    pub down_port: u16,
    pub host_name: String,
}

impl Host {
    /// Host record of a CDN seed node
    pub fn cdn(uuid: impl Into<String>, server: &CdnServer) -> Self {
        Self {
            uuid: uuid.into(),
            host_type: HostType::Cdn,
            ip: server.ip.clone(),
            rpc_port: server.port,
            down_port: server.download_port,
            host_name: server.host_name.clone(),
        }
    }

    /// Host record of a registering peer
    pub fn peer(peer_host: &PeerHost) -> Self {
        Self {
            uuid: peer_host.uuid.clone(),
            host_type: HostType::Peer,
            ip: peer_host.ip.clone(),
            rpc_port: peer_host.rpc_port,
            down_port: peer_host.down_port,
            host_name: peer_host.host_name.clone(),
        }
    }

    pub fn is_cdn(&self) -> bool {
        self.host_type == HostType::Cdn
    }
}

/// Registry of known hosts, keyed by host UUID
pub struct HostManager {
    hosts: RwLock<HashMap<String, Arc<Host>>>,
}

impl HostManager {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, uuid: &str) -> Option<Arc<Host>> {
        self.hosts.read().await.get(uuid).cloned()
    }

    /// Register a host; an existing entry with the same UUID is kept and returned
    pub async fn add(&self, host: Host) -> Arc<Host> {
        let mut hosts = self.hosts.write().await;
        hosts
            .entry(host.uuid.clone())
            .or_insert_with(|| {
                tracing::debug!(uuid = %host.uuid, host_name = %host.host_name, "Registered host");
                Arc::new(host)
            })
            .clone()
    }

    pub async fn delete(&self, uuid: &str) -> Option<Arc<Host>> {
        self.hosts.write().await.remove(uuid)
    }

    pub async fn len(&self) -> usize {
        self.hosts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hosts.read().await.is_empty()
    }
}

impl Default for HostManager {
    fn default() -> Self {
        Self::new()
    }
}
