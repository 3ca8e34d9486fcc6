//! Common test utilities: in-memory CDN and scheduler fakes

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use seedsched::cdn::{CdnClient, CdnManager, PieceSeed, SeedRequest, SeedStream, TriggerCallback};
use seedsched::config::{CdnConfig, CdnServer, Dynconfig, DynconfigData};
use seedsched::error::{Code, Error, Result};
use seedsched::resource::{HostManager, Piece, TaskManager};
use seedsched::rpc::{
    ConnectionRouter, NodePool, PeerHost, PeerPacket, PeerResult, PeerTarget, PeerTaskRequest,
    PieceResult, PieceResultChannel, RegisterResult, SchedulerNode,
};
use seedsched::resource::SizeScope;

pub type SeedSender = UnboundedSender<Result<Option<PieceSeed>>>;

// ============================================================================
// CDN
// ============================================================================

/// CDN client whose seed streams are fed by the test
#[derive(Default)]
pub struct FakeCdnClient {
    opened: AtomicUsize,
    senders: Mutex<HashMap<String, SeedSender>>,
    open_error: Mutex<Option<Error>>,
}

impl FakeCdnClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later `obtain_seeds` fail
    pub fn fail_open(&self, err: Error) {
        *self.open_error.lock().unwrap() = Some(err);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sender of the stream opened for a task, waiting for it to open
    pub async fn sender(&self, task_id: &str) -> SeedSender {
        for _ in 0..500 {
            if let Some(sender) = self.senders.lock().unwrap().get(task_id) {
                return sender.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no seed stream opened for {task_id}");
    }

    /// Wait until `count` streams have been requested
    pub async fn wait_opened(&self, count: usize) {
        for _ in 0..500 {
            if self.opened() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("only {} of {count} seed streams opened", self.opened());
    }

    /// Drop the test side of a stream, ending it
    pub fn close(&self, task_id: &str) {
        self.senders.lock().unwrap().remove(task_id);
    }
}

#[async_trait]
impl CdnClient for FakeCdnClient {
    async fn obtain_seeds(&self, request: SeedRequest) -> Result<SeedStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.open_error.lock().unwrap().clone() {
            return Err(err);
        }

        let (tx, rx) = unbounded();
        self.senders.lock().unwrap().insert(request.task_id, tx);
        Ok(rx.boxed())
    }
}

pub fn cdn_server(host_name: &str, download_port: u16) -> CdnServer {
    CdnServer {
        host_name: host_name.to_string(),
        ip: "127.0.0.1".to_string(),
        port: 8003,
        download_port,
    }
}

pub fn piece_seed(seeder: &str, piece_num: u32) -> PieceSeed {
    PieceSeed {
        peer_id: format!("{seeder}-peer"),
        seeder_name: seeder.to_string(),
        piece_info: Some(Piece {
            piece_num,
            range_start: u64::from(piece_num) * 4096,
            range_size: 4096,
            piece_md5: format!("md5-{piece_num}"),
            ..Piece::new(piece_num)
        }),
        ..Default::default()
    }
}

pub fn done_seed(seeder: &str, content_length: i64, total_piece_count: i32) -> PieceSeed {
    PieceSeed {
        peer_id: format!("{seeder}-peer"),
        seeder_name: seeder.to_string(),
        piece_info: None,
        done: true,
        content_length,
        total_piece_count,
    }
}

/// Everything a CDN manager test needs
pub struct Harness {
    pub manager: Arc<CdnManager>,
    pub client: Arc<FakeCdnClient>,
    pub tasks: Arc<TaskManager>,
    pub hosts: Arc<HostManager>,
    pub dynconfig: Dynconfig,
}

impl Harness {
    pub async fn new(servers: Vec<CdnServer>, failure_grace: Duration) -> Self {
        let config = CdnConfig {
            failure_grace_ms: failure_grace.as_millis() as u64,
            tiny_file_timeout_ms: 2_000,
            ..Default::default()
        };
        let dynconfig = Dynconfig::new(DynconfigData { cdns: servers });
        let client = FakeCdnClient::new();
        let tasks = Arc::new(TaskManager::new());
        let hosts = Arc::new(HostManager::new());
        let notifier = tasks.peer_tasks().clone();

        let manager = CdnManager::new(
            &config,
            &dynconfig,
            client.clone(),
            Arc::clone(&tasks),
            Arc::clone(&hosts),
            notifier,
        )
        .await
        .unwrap();

        Self {
            manager,
            client,
            tasks,
            hosts,
            dynconfig,
        }
    }

    /// Wait until the task reports completion
    pub async fn wait_completed(&self, task_id: &str) -> SizeScope {
        for _ in 0..500 {
            if let Some(task) = self.tasks.get(task_id).await {
                if task.is_completed() {
                    return task.size_scope();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never completed");
    }
}

/// Callback that forwards the outcome to a receiver
pub fn callback() -> (TriggerCallback, oneshot::Receiver<Option<Error>>) {
    let (tx, rx) = oneshot::channel();
    let callback: TriggerCallback = Box::new(move |err| {
        let _ = tx.send(err);
    });
    (callback, rx)
}

// ============================================================================
// Scheduler
// ============================================================================

/// Scheduler node that answers from memory
pub struct FakeScheduler {
    target: String,
    healthy: AtomicBool,
    rejection: Mutex<Option<Error>>,
    assigned_task_id: Mutex<Option<String>>,
    calls: Mutex<Vec<&'static str>>,
    sent: Arc<Mutex<Vec<PieceResult>>>,
    failing_sends: Arc<AtomicU32>,
}

impl FakeScheduler {
    pub fn new(target: &str) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            healthy: AtomicBool::new(true),
            rejection: Mutex::new(None),
            assigned_task_id: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            failing_sends: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Answer every call with this error
    pub fn reject_with(&self, err: Error) {
        *self.rejection.lock().unwrap() = Some(err);
    }

    /// Answer registrations with this task id instead of the requested one
    pub fn assign_task_id(&self, task_id: &str) {
        *self.assigned_task_id.lock().unwrap() = Some(task_id.to_string());
    }

    /// Fail the next `count` piece result sends on channels of this node
    pub fn fail_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == method)
            .count()
    }

    pub fn sent(&self) -> Vec<PieceResult> {
        self.sent.lock().unwrap().clone()
    }

    fn enter(&self, method: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(method);
        if let Some(err) = self.rejection.lock().unwrap().clone() {
            return Err(err);
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ServerUnavailable(format!("{} is down", self.target)))
        }
    }
}

struct FakeChannel {
    sent: Arc<Mutex<Vec<PieceResult>>>,
    failing_sends: Arc<AtomicU32>,
    task_id: String,
}

#[async_trait]
impl PieceResultChannel for FakeChannel {
    async fn send(&mut self, result: PieceResult) -> Result<()> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::ServerUnavailable("channel reset".to_string()));
        }
        self.sent.lock().unwrap().push(result);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<PeerPacket>> {
        Ok(Some(PeerPacket {
            task_id: self.task_id.clone(),
            src_pid: "child".to_string(),
            main_peer: None,
            steal_peers: Vec::new(),
            code: Code::Success,
        }))
    }
}

#[async_trait]
impl SchedulerNode for FakeScheduler {
    fn target(&self) -> &str {
        &self.target
    }

    async fn register_peer_task(&self, request: &PeerTaskRequest) -> Result<RegisterResult> {
        self.enter("register_peer_task")?;
        let task_id = self
            .assigned_task_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| {
                seedsched::idgen::task_id_with_biz(&request.url, &request.url_meta, &request.biz_id)
            });
        Ok(RegisterResult {
            task_id,
            size_scope: SizeScope::Normal,
            direct_piece: None,
        })
    }

    async fn report_piece_result(
        &self,
        task_id: &str,
        _request: &PeerTaskRequest,
    ) -> Result<Box<dyn PieceResultChannel>> {
        self.enter("report_piece_result")?;
        Ok(Box::new(FakeChannel {
            sent: Arc::clone(&self.sent),
            failing_sends: Arc::clone(&self.failing_sends),
            task_id: task_id.to_string(),
        }))
    }

    async fn report_peer_result(&self, _result: &PeerResult) -> Result<()> {
        self.enter("report_peer_result")
    }

    async fn leave_task(&self, _target: &PeerTarget) -> Result<()> {
        self.enter("leave_task")
    }
}

/// Pool over the given fakes
pub fn pool(nodes: &[Arc<FakeScheduler>]) -> Arc<NodePool> {
    Arc::new(NodePool::new(
        nodes
            .iter()
            .map(|node| Arc::clone(node) as Arc<dyn SchedulerNode>)
            .collect(),
    ))
}

/// Target the pool binds `key` to first, among fresh nodes with these targets
pub async fn first_choice(key: &str, targets: &[&str]) -> String {
    let nodes: Vec<_> = targets.iter().map(|t| FakeScheduler::new(t)).collect();
    let probe = pool(&nodes);
    probe
        .resolve(key, false)
        .await
        .unwrap()
        .target()
        .to_string()
}

pub fn peer_task_request(url: &str) -> PeerTaskRequest {
    PeerTaskRequest {
        url: url.to_string(),
        peer_id: seedsched::idgen::peer_id("10.0.0.7"),
        peer_host: PeerHost {
            uuid: "host-7".to_string(),
            ip: "10.0.0.7".to_string(),
            rpc_port: 65000,
            down_port: 65001,
            host_name: "peer-7".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}
