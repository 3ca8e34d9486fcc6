//! Piece result stream with node migration

use std::sync::Arc;

use super::client::{call_with_migration, CallPolicy};
use super::connection::{ConnectionRouter, PieceResultChannel};
use super::types::{PeerPacket, PeerTaskRequest, PieceResult};
use crate::config::SchedulerClientConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::utils::retry::RetryConfig;

const METHOD: &str = "report_piece_result";

/// Bidirectional piece result stream for one peer task
///
/// Sends piece results and receives parent assignments. When the serving
/// node fails, the task key is migrated, the channel re-opened on the new
/// node and the last sent piece result replayed before the failed operation
/// is retried. Migrations are bounded across the stream's whole lifetime.
pub struct PeerPacketStream {
    router: Arc<dyn ConnectionRouter>,
    retry: RetryConfig,
    max_migrations: u32,
    task_id: String,
    request: PeerTaskRequest,
    channel: Box<dyn PieceResultChannel>,
    target: String,
    excluded: Vec<String>,
    last_sent: Option<PieceResult>,
}

impl PeerPacketStream {
    pub(crate) async fn open(
        router: Arc<dyn ConnectionRouter>,
        config: &SchedulerClientConfig,
        task_id: &str,
        request: PeerTaskRequest,
    ) -> Result<Self> {
        let retry = config.report.clone();
        let mut excluded = Vec::new();

        let (channel, target) = Self::open_channel(
            router.as_ref(),
            &retry,
            config.max_migrations,
            task_id,
            &request,
            &mut excluded,
        )
        .await?;

        Ok(Self {
            router,
            retry,
            max_migrations: config.max_migrations,
            task_id: task_id.to_string(),
            request,
            channel,
            target,
            excluded,
            last_sent: None,
        })
    }

    async fn open_channel(
        router: &dyn ConnectionRouter,
        retry: &RetryConfig,
        max_migrations: u32,
        task_id: &str,
        request: &PeerTaskRequest,
        excluded: &mut Vec<String>,
    ) -> Result<(Box<dyn PieceResultChannel>, String)> {
        let budget = max_migrations.saturating_sub(excluded.len() as u32);
        call_with_migration(
            router,
            task_id,
            CallPolicy {
                method: METHOD,
                stick: true,
                retry,
                max_migrations: budget,
            },
            excluded,
            |node| async move { node.report_piece_result(task_id, request).await },
        )
        .await
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Node currently serving the stream
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of nodes the stream has migrated away from
    pub fn migrations(&self) -> usize {
        self.excluded.len()
    }

    pub async fn send(&mut self, result: PieceResult) -> Result<()> {
        loop {
            match self.channel.send(result.clone()).await {
                Ok(()) => {
                    self.last_sent = Some(result);
                    return Ok(());
                }
                Err(e) => self.recover(e).await?,
            }
        }
    }

    /// Next parent assignment; `None` once the scheduler closed the stream
    pub async fn recv(&mut self) -> Result<Option<PeerPacket>> {
        loop {
            match self.channel.recv().await {
                Ok(packet) => return Ok(packet),
                Err(e) => self.recover(e).await?,
            }
        }
    }

    /// Move to another node after a channel failure
    async fn recover(&mut self, mut err: Error) -> Result<()> {
        loop {
            if !err.is_migratable() || self.excluded.len() as u32 >= self.max_migrations {
                return Err(err);
            }

            let previous = self.router.migrate(&self.task_id, &self.excluded).await?;
            metrics::record_rpc_migration(METHOD);
            tracing::warn!(
                task_id = %self.task_id,
                peer_id = %self.request.peer_id,
                from = %previous,
                error = %err,
                "Piece result stream failed, migrating"
            );
            self.excluded.push(previous);

            let (channel, target) = Self::open_channel(
                self.router.as_ref(),
                &self.retry,
                self.max_migrations,
                &self.task_id,
                &self.request,
                &mut self.excluded,
            )
            .await?;
            self.channel = channel;
            self.target = target;

            let Some(last) = self.last_sent.clone() else {
                return Ok(());
            };
            match self.channel.send(last).await {
                Ok(()) => return Ok(()),
                Err(e) => err = e,
            }
        }
    }
}
