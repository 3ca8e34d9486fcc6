//! Resilient scheduler client
//!
//! Every call resolves a scheduler node for its routing key, runs inside the
//! bounded retry loop and, once the retry budget is spent on a migratable
//! error, moves the key to another node and starts over. The nodes a call
//! has already migrated away from are excluded for the rest of that call.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::connection::{ConnectionRouter, SchedulerNode};
use super::stream::PeerPacketStream;
use super::types::{PeerResult, PeerTarget, PeerTaskRequest, PieceResult, RegisterResult};
use crate::config::SchedulerClientConfig;
use crate::error::{Code, Error, Result};
use crate::idgen;
use crate::metrics;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// How one logical call resolves, retries and migrates
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallPolicy<'a> {
    pub method: &'static str,
    /// Only use an existing key binding
    pub stick: bool,
    pub retry: &'a RetryConfig,
    pub max_migrations: u32,
}

/// Run `op` against the node serving `key`, retrying and migrating on failure
///
/// `excluded` collects the nodes migrated away from and is carried across
/// calls by long-lived callers. Returns the result and the serving node.
pub(crate) async fn call_with_migration<T, F, Fut>(
    router: &dyn ConnectionRouter,
    key: &str,
    policy: CallPolicy<'_>,
    excluded: &mut Vec<String>,
    op: F,
) -> Result<(T, String)>
where
    F: Fn(Arc<dyn SchedulerNode>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut migrations = 0u32;
    let op = &op;

    loop {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let outcome = with_retry_if(
            policy.retry,
            move || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_rpc_retry(policy.method);
                }
                async move {
                    let node = router
                        .resolve(key, policy.stick)
                        .await
                        .map_err(|e| match e {
                            Error::ServerUnavailable(_) => e,
                            other => Error::ServerUnavailable(other.to_string()),
                        })?;
                    let target = node.target().to_string();
                    op(node).await.map(|value| (value, target))
                }
            },
            Error::is_recoverable,
        )
        .await;

        let err = match outcome {
            Ok(done) => return Ok(done),
            Err(err) => err,
        };

        if !err.is_migratable() || migrations >= policy.max_migrations {
            return Err(err);
        }

        match router.migrate(key, excluded).await {
            Ok(previous) => {
                migrations += 1;
                metrics::record_rpc_migration(policy.method);
                tracing::warn!(
                    method = policy.method,
                    key = %key,
                    from = %previous,
                    migrations,
                    error = %err,
                    "Call failed, migrating to another scheduler"
                );
                excluded.push(previous);
            }
            Err(migrate_err) => {
                tracing::warn!(
                    method = policy.method,
                    key = %key,
                    error = %err,
                    migrate_error = %migrate_err,
                    "Call failed and no scheduler is left to migrate to"
                );
                return Err(migrate_err);
            }
        }
    }
}

/// Client for a cluster of scheduler nodes
pub struct SchedulerClient {
    router: Arc<dyn ConnectionRouter>,
    config: SchedulerClientConfig,
}

impl SchedulerClient {
    pub fn new(router: Arc<dyn ConnectionRouter>, config: SchedulerClientConfig) -> Self {
        Self { router, config }
    }

    pub fn router(&self) -> &Arc<dyn ConnectionRouter> {
        &self.router
    }

    fn policy<'a>(&self, method: &'static str, stick: bool, retry: &'a RetryConfig) -> CallPolicy<'a> {
        CallPolicy {
            method,
            stick,
            retry,
            max_migrations: self.config.max_migrations,
        }
    }

    /// Register a peer task
    ///
    /// Routed by the locally computed task id. When the scheduler answers
    /// with a different task id, that id is bound to the same node.
    pub async fn register_peer_task(&self, request: &PeerTaskRequest) -> Result<RegisterResult> {
        let key = idgen::task_id_with_biz(&request.url, &request.url_meta, &request.biz_id);
        tracing::info!(
            peer_id = %request.peer_id,
            key = %key,
            url = %request.url,
            "Registering peer task"
        );

        let mut excluded = Vec::new();
        let outcome = call_with_migration(
            self.router.as_ref(),
            &key,
            self.policy("register_peer_task", false, &self.config.register),
            &mut excluded,
            |node| async move { node.register_peer_task(request).await },
        )
        .await;

        match outcome {
            Ok((result, scheduler)) => {
                if result.task_id != key {
                    tracing::warn!(
                        peer_id = %request.peer_id,
                        from = %key,
                        to = %result.task_id,
                        "Correcting task id"
                    );
                    self.router.correct_key(&key, &result.task_id).await;
                }
                tracing::info!(
                    peer_id = %request.peer_id,
                    task_id = %result.task_id,
                    code = Code::Success.as_i32(),
                    peer_ip = %request.peer_host.ip,
                    security_domain = %request.peer_host.security_domain,
                    idc = %request.peer_host.idc,
                    scheduler = %scheduler,
                    "Registered peer task"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    peer_id = %request.peer_id,
                    key = %key,
                    code = e.code().as_i32(),
                    error = %e,
                    "Failed to register peer task"
                );
                Err(e)
            }
        }
    }

    /// Open the piece result stream for a registered task
    ///
    /// A keep-alive piece result is sent right away so the scheduler starts
    /// scheduling before any real result arrives.
    pub async fn report_piece_result(
        &self,
        task_id: &str,
        request: &PeerTaskRequest,
    ) -> Result<PeerPacketStream> {
        let mut stream = PeerPacketStream::open(
            Arc::clone(&self.router),
            &self.config,
            task_id,
            request.clone(),
        )
        .await
        .inspect_err(|e| {
            tracing::warn!(
                peer_id = %request.peer_id,
                task_id = %task_id,
                error = %e,
                "Failed to open piece result stream"
            );
        })?;

        tracing::info!(
            peer_id = %request.peer_id,
            task_id = %task_id,
            scheduler = %stream.target(),
            "Started reporting piece results"
        );

        stream
            .send(PieceResult::zero(task_id, &request.peer_id))
            .await?;
        Ok(stream)
    }

    /// Report a peer's final download result
    pub async fn report_peer_result(&self, result: &PeerResult) -> Result<()> {
        let mut excluded = Vec::new();
        let outcome = call_with_migration(
            self.router.as_ref(),
            &result.task_id,
            self.policy("report_peer_result", true, &self.config.report),
            &mut excluded,
            |node| async move { node.report_peer_result(result).await },
        )
        .await;

        match &outcome {
            Ok(((), scheduler)) => tracing::info!(
                peer_id = %result.peer_id,
                task_id = %result.task_id,
                peer_success = result.success,
                peer_code = result.code.as_i32(),
                url = %result.url,
                scheduler = %scheduler,
                length = result.content_length,
                traffic = result.traffic,
                cost = result.cost,
                "Reported peer result"
            ),
            Err(e) => tracing::warn!(
                peer_id = %result.peer_id,
                task_id = %result.task_id,
                code = e.code().as_i32(),
                error = %e,
                "Failed to report peer result"
            ),
        }

        outcome.map(|_| ())
    }

    /// Tell the scheduler a peer left a task
    pub async fn leave_task(&self, target: &PeerTarget) -> Result<()> {
        let mut excluded = Vec::new();
        let outcome = call_with_migration(
            self.router.as_ref(),
            &target.task_id,
            self.policy("leave_task", true, &self.config.leave),
            &mut excluded,
            |node| async move { node.leave_task(target).await },
        )
        .await;

        match &outcome {
            Ok(((), scheduler)) => tracing::info!(
                peer_id = %target.peer_id,
                task_id = %target.task_id,
                scheduler = %scheduler,
                "Left task"
            ),
            Err(e) => tracing::warn!(
                peer_id = %target.peer_id,
                task_id = %target.task_id,
                code = e.code().as_i32(),
                error = %e,
                "Failed to leave task"
            ),
        }

        outcome.map(|_| ())
    }
}
