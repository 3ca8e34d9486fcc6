//! CDN seeding orchestration
//!
//! [`CdnManager`] opens at most one seed stream per task, applies the stream's
//! piece events to the task and peer registries, and releases a single
//! fan-out notification to every caller waiting on the task's first seed.
//!
//! # Fan-out table
//!
//! One entry per task with an open seeding attempt. The entry holds the
//! trigger callbacks and the peer tasks registered through
//! [`CdnManager::add_to_callback`]. It is created by the first
//! [`CdnManager::trigger_task`] and removed the moment the first seed or a
//! terminal error arrives, so each attempt notifies at most once.
//!
//! The table lock is never held while calling into the registries.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::client::{CdnClient, PieceSeed, SeedRequest, SeedStream};
use super::tiny::TinyFileClient;
use crate::config::{CdnConfig, CdnServer, Dynconfig, DynconfigData, Observer};
use crate::error::{Code, Error, Result};
use crate::idgen;
use crate::metrics;
use crate::resource::{
    Host, HostManager, PeerNotifier, PeerTask, SizeScope, Task, TaskManager, TINY_FILE_SIZE,
};
use crate::rpc::types::PieceResult;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// One-shot callback receiving a task's first-seed outcome
///
/// `None` means seeding started; `Some` carries the terminal error.
pub type TriggerCallback = Box<dyn FnOnce(Option<Error>) + Send + 'static>;

struct FanoutEntry {
    task: Arc<Task>,
    // Callbacks are `Send` only; the mutex keeps the entry `Sync`.
    callbacks: Mutex<Vec<TriggerCallback>>,
    waiters: Vec<Arc<PeerTask>>,
    started_at: Instant,
}

/// Drives CDN seeding for tasks
pub struct CdnManager {
    client: Arc<dyn CdnClient>,
    servers: RwLock<HashMap<String, CdnServer>>,
    fanout: RwLock<HashMap<String, FanoutEntry>>,
    task_manager: Arc<TaskManager>,
    host_manager: Arc<HostManager>,
    notifier: Arc<dyn PeerNotifier>,
    tiny_files: TinyFileClient,
    open_retry: RetryConfig,
    failure_grace: Duration,
}

impl CdnManager {
    /// Create a manager seeded with the current CDN list and subscribe it to
    /// configuration updates
    pub async fn new(
        config: &CdnConfig,
        dynconfig: &Dynconfig,
        client: Arc<dyn CdnClient>,
        task_manager: Arc<TaskManager>,
        host_manager: Arc<HostManager>,
        notifier: Arc<dyn PeerNotifier>,
    ) -> Result<Arc<Self>> {
        let data = dynconfig.get().await;
        client.update_state(&data.cdns);

        let manager = Arc::new(Self {
            client,
            servers: RwLock::new(servers_by_name(&data.cdns)),
            fanout: RwLock::new(HashMap::new()),
            task_manager,
            host_manager,
            notifier,
            tiny_files: TinyFileClient::new(config.tiny_file_timeout())?,
            open_retry: config.open_retry.clone(),
            failure_grace: config.failure_grace(),
        });

        dynconfig.register(manager.clone()).await;

        tracing::info!(cdns = data.cdns.len(), "CDN manager initialized");
        Ok(manager)
    }

    /// Configured CDN server by host name
    pub async fn server(&self, host_name: &str) -> Option<CdnServer> {
        self.servers.read().await.get(host_name).cloned()
    }

    /// Configured CDN servers, ordered by host name
    pub async fn servers(&self) -> Vec<CdnServer> {
        let mut servers: Vec<_> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        servers
    }

    /// Whether a seeding attempt for the task awaits its first seed
    pub async fn is_in_flight(&self, task_id: &str) -> bool {
        self.fanout.read().await.contains_key(task_id)
    }

    /// Number of peer tasks waiting on a task's first seed
    pub async fn waiter_count(&self, task_id: &str) -> usize {
        self.fanout
            .read()
            .await
            .get(task_id)
            .map_or(0, |entry| entry.waiters.len())
    }

    /// Start seeding a task unless an attempt is already in flight
    ///
    /// The callback is invoked exactly once with the first-seed outcome. If
    /// an attempt is already running the callback joins it and no second
    /// stream is opened. Fails with `NeedBackSource` when no CDN is
    /// configured; the callback is dropped uncalled in that case.
    pub async fn trigger_task(
        self: &Arc<Self>,
        task: Arc<Task>,
        callback: TriggerCallback,
    ) -> Result<()> {
        if self.servers.read().await.is_empty() {
            return Err(Error::NeedBackSource("empty cdn".to_string()));
        }

        {
            let mut fanout = self.fanout.write().await;
            if let Some(entry) = fanout.get_mut(task.task_id()) {
                entry
                    .callbacks
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(callback);
                tracing::debug!(task_id = %task.task_id(), "Seeding already in flight");
                return Ok(());
            }

            fanout.insert(
                task.task_id().to_string(),
                FanoutEntry {
                    task: Arc::clone(&task),
                    callbacks: Mutex::new(vec![callback]),
                    waiters: Vec::new(),
                    started_at: Instant::now(),
                },
            );
            metrics::update_in_flight(fanout.len());
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.open_stream(&task).await {
                Ok(stream) => {
                    metrics::record_seed_stream(true);
                    manager.work(task, stream).await;
                }
                Err(e) => {
                    metrics::record_seed_stream(false);
                    tracing::warn!(
                        task_id = %task.task_id(),
                        error = %e,
                        "Failed to open seed stream"
                    );
                    manager.do_callback(&task, Some(e.into_cdn())).await;
                }
            }
        });

        Ok(())
    }

    async fn open_stream(&self, task: &Task) -> Result<SeedStream> {
        let request = SeedRequest {
            task_id: task.task_id().to_string(),
            url: task.url().to_string(),
            filter: task.filter().to_string(),
            url_meta: task.url_meta().clone(),
        };

        with_retry_if(
            &self.open_retry,
            || {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move { client.obtain_seeds(request).await }
            },
            Error::is_recoverable,
        )
        .await
    }

    /// Consume a task's seed stream until it ends or fails
    ///
    /// The first event applied without error releases the success fan-out.
    /// Events that fail to apply are logged and dropped. A receive error
    /// after the first seed records the error on the task and tears it down
    /// after the grace delay.
    pub async fn work(self: &Arc<Self>, task: Arc<Task>, mut stream: SeedStream) {
        let mut wait_callback = true;

        loop {
            match stream.next().await {
                None => {
                    tracing::debug!(task_id = %task.task_id(), "Seed stream closed");
                    if wait_callback {
                        self.do_callback(&task, Some(Error::Cdn("seed stream closed".to_string())))
                            .await;
                    }
                    return;
                }
                Some(Err(e)) => {
                    let err = e.into_cdn();
                    tracing::warn!(
                        task_id = %task.task_id(),
                        error = %err,
                        "Received a failure from cdn"
                    );
                    if wait_callback {
                        self.do_callback(&task, Some(err)).await;
                    } else {
                        // Waiters were already released; only the teardown remains.
                        task.set_cdn_error(Some(err.clone()));
                        let manager = Arc::clone(self);
                        tokio::spawn(async move { manager.teardown(&task, &err).await });
                    }
                    return;
                }
                Some(Ok(None)) => {
                    tracing::warn!(task_id = %task.task_id(), "Received an empty piece seed");
                }
                Some(Ok(Some(seed))) => match self.process_piece_seed(&task, &seed).await {
                    Ok(()) => {
                        metrics::record_seed_event(true);
                        tracing::debug!(
                            task_id = %task.task_id(),
                            piece_num = seed.piece_info.as_ref().map(|p| p.piece_num),
                            done = seed.done,
                            "Applied piece seed"
                        );
                        if wait_callback {
                            wait_callback = false;
                            self.do_callback(&task, None).await;
                        }
                    }
                    Err(e) => {
                        metrics::record_seed_event(false);
                        tracing::warn!(
                            task_id = %task.task_id(),
                            seeder = %seed.seeder_name,
                            error = %e,
                            "Dropped piece seed"
                        );
                    }
                },
            }
        }
    }

    /// Apply one seed event to the task, its seeding host and peer task
    pub async fn process_piece_seed(&self, task: &Arc<Task>, seed: &PieceSeed) -> Result<()> {
        let host = self.seed_host(&seed.seeder_name).await?;

        let peer_tasks = self.task_manager.peer_tasks();
        let peer = match peer_tasks.get(&seed.peer_id).await {
            Some(peer) => {
                peer.bind_host(&host.uuid);
                peer
            }
            None => peer_tasks.add(&seed.peer_id, task, Some(host.as_ref())).await,
        };

        if seed.done {
            let piece_total = peer.finished_count();
            peer.mark_success();

            let tiny_content = if piece_total == 1 && seed.content_length <= TINY_FILE_SIZE {
                match self.tiny_files.fetch(task.task_id(), &host).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        tracing::debug!(
                            task_id = %task.task_id(),
                            error = %e,
                            "Tiny file fetch failed"
                        );
                        None
                    }
                }
            } else {
                None
            };

            let scope = SizeScope::classify(piece_total, seed.content_length, tiny_content.as_deref());
            if task.complete(piece_total, seed.content_length, scope, tiny_content) {
                tracing::info!(
                    task_id = %task.task_id(),
                    piece_total,
                    content_length = seed.content_length,
                    size_scope = ?scope,
                    "Seeding completed"
                );
            } else {
                tracing::debug!(task_id = %task.task_id(), "Task already completed");
            }
            return Ok(());
        }

        if let Some(info) = &seed.piece_info {
            task.get_or_create_piece(info.piece_num);
            task.update_piece(info.clone());

            let finished_count = info
                .piece_num
                .saturating_add(1)
                .max(peer.finished_count());
            peer.add_piece_result(PieceResult {
                task_id: task.task_id().to_string(),
                src_pid: peer.peer_id().to_string(),
                dst_pid: String::new(),
                piece_num: i32::try_from(info.piece_num).unwrap_or(i32::MAX),
                success: true,
                code: Code::Success,
                finished_count,
            });
        }

        Ok(())
    }

    async fn seed_host(&self, seeder_name: &str) -> Result<Arc<Host>> {
        let uuid = idgen::cdn_host_uuid(seeder_name);
        if let Some(host) = self.host_manager.get(&uuid).await {
            return Ok(host);
        }

        let server = self
            .server(seeder_name)
            .await
            .ok_or_else(|| Error::NotFound(format!("cdn {seeder_name} not found")))?;

        Ok(self.host_manager.add(Host::cdn(uuid, &server)).await)
    }

    /// Release the fan-out for a task's current seeding attempt
    ///
    /// Clears the entry and dispatches the notifications on a separate task.
    /// On error the task and its peer tasks are removed after the grace
    /// delay. A no-op when the task has no entry.
    pub async fn do_callback(self: &Arc<Self>, task: &Arc<Task>, err: Option<Error>) {
        let entry = {
            let mut fanout = self.fanout.write().await;
            let is_current = fanout
                .get(task.task_id())
                .is_some_and(|entry| Arc::ptr_eq(&entry.task, task));
            let entry = if is_current {
                fanout.remove(task.task_id())
            } else {
                None
            };
            metrics::update_in_flight(fanout.len());
            entry
        };

        let Some(entry) = entry else {
            return;
        };

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.dispatch(entry, err).await });
    }

    async fn dispatch(&self, entry: FanoutEntry, err: Option<Error>) {
        let FanoutEntry {
            task,
            callbacks,
            waiters,
            started_at,
        } = entry;

        let callbacks = callbacks.into_inner().unwrap_or_else(PoisonError::into_inner);

        task.set_cdn_error(err.clone());
        metrics::observe_first_seed(err.is_none(), started_at.elapsed().as_secs_f64());

        let delivered = callbacks.len() + waiters.len();
        for callback in callbacks {
            let err = err.clone();
            if catch_unwind(AssertUnwindSafe(move || callback(err))).is_err() {
                tracing::error!(task_id = %task.task_id(), "Trigger callback panicked");
            }
        }

        for peer in &waiters {
            let notified = catch_unwind(AssertUnwindSafe(|| {
                self.notifier.on_seed_result(peer, err.as_ref())
            }));
            if notified.is_err() {
                tracing::error!(
                    task_id = %task.task_id(),
                    peer_id = %peer.peer_id(),
                    "Peer notifier panicked"
                );
            }
        }
        metrics::record_fanout(err.is_none(), delivered);

        if let Some(err) = err {
            self.teardown(&task, &err).await;
        }
    }

    /// Remove a failed task and its peer tasks once the grace delay elapses
    async fn teardown(&self, task: &Task, err: &Error) {
        tokio::time::sleep(self.failure_grace).await;

        self.task_manager.delete(task.task_id()).await;
        let removed = self
            .task_manager
            .peer_tasks()
            .delete_task(task.task_id())
            .await;
        metrics::record_teardown("cdn_error");
        tracing::info!(
            task_id = %task.task_id(),
            peer_tasks = removed,
            error = %err,
            "Removed task after seeding failure"
        );
    }

    /// Add a peer task to its task's in-flight waiter list
    ///
    /// A no-op if the peer is absent or its task has no seeding attempt
    /// awaiting the first seed.
    pub async fn add_to_callback(&self, peer: Option<&Arc<PeerTask>>) {
        let Some(peer) = peer else {
            return;
        };

        if !self.fanout.read().await.contains_key(peer.task_id()) {
            return;
        }

        // The entry may have fired between the two lock phases.
        let mut fanout = self.fanout.write().await;
        if let Some(entry) = fanout.get_mut(peer.task_id()) {
            entry.waiters.push(Arc::clone(peer));
        }
    }
}

#[async_trait]
impl Observer for CdnManager {
    async fn on_notify(&self, data: &DynconfigData) {
        *self.servers.write().await = servers_by_name(&data.cdns);
        self.client.update_state(&data.cdns);
        tracing::info!(cdns = data.cdns.len(), "CDN server list replaced");
    }
}

fn servers_by_name(servers: &[CdnServer]) -> HashMap<String, CdnServer> {
    servers
        .iter()
        .map(|server| (server.host_name.clone(), server.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Piece;
    use crate::rpc::types::UrlMeta;
    use futures::stream;

    struct NoopClient;

    #[async_trait]
    impl CdnClient for NoopClient {
        async fn obtain_seeds(&self, _request: SeedRequest) -> Result<SeedStream> {
            Ok(stream::empty().boxed())
        }
    }

    fn server(name: &str) -> CdnServer {
        CdnServer {
            host_name: name.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8003,
            download_port: 1,
        }
    }

    async fn manager(servers: Vec<CdnServer>) -> Arc<CdnManager> {
        let dynconfig = Dynconfig::new(DynconfigData { cdns: servers });
        let task_manager = Arc::new(TaskManager::new());
        let notifier = task_manager.peer_tasks().clone();
        CdnManager::new(
            &CdnConfig::default(),
            &dynconfig,
            Arc::new(NoopClient),
            task_manager,
            Arc::new(HostManager::new()),
            notifier,
        )
        .await
        .unwrap()
    }

    fn seed(piece_num: u32) -> PieceSeed {
        PieceSeed {
            peer_id: "cdn-peer".to_string(),
            seeder_name: "cdn-1".to_string(),
            piece_info: Some(Piece::new(piece_num)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_seeder_is_rejected() {
        let manager = manager(vec![server("cdn-1")]).await;
        let task = Arc::new(Task::new("t1", "http://a", UrlMeta::default()));

        let mut event = seed(0);
        event.seeder_name = "cdn-9".to_string();

        let err = manager.process_piece_seed(&task, &event).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(task.piece_count(), 0);
    }

    #[tokio::test]
    async fn test_reordered_pieces_keep_finished_count() {
        let manager = manager(vec![server("cdn-1")]).await;
        let task = Arc::new(Task::new("t1", "http://a", UrlMeta::default()));

        for piece_num in [0, 3, 1] {
            manager.process_piece_seed(&task, &seed(piece_num)).await.unwrap();
        }

        let peer = manager
            .task_manager
            .peer_tasks()
            .get("cdn-peer")
            .await
            .unwrap();
        assert_eq!(peer.finished_count(), 4);
        assert_eq!(task.piece_count(), 3);
        assert_eq!(
            peer.host_id().as_deref(),
            Some(idgen::cdn_host_uuid("cdn-1").as_str())
        );
    }

    #[tokio::test]
    async fn test_on_notify_replaces_servers() {
        let manager = manager(vec![server("cdn-1"), server("cdn-2")]).await;

        manager
            .on_notify(&DynconfigData {
                cdns: vec![server("cdn-3")],
            })
            .await;

        assert!(manager.server("cdn-1").await.is_none());
        assert_eq!(manager.servers().await, vec![server("cdn-3")]);
    }

    #[tokio::test]
    async fn test_add_to_callback_without_entry_is_noop() {
        let manager = manager(vec![server("cdn-1")]).await;
        let peer = Arc::new(PeerTask::new("p1", "t1", None));

        manager.add_to_callback(Some(&peer)).await;
        manager.add_to_callback(None).await;

        assert!(!manager.is_in_flight("t1").await);
        assert_eq!(manager.waiter_count("t1").await, 0);
    }
}
