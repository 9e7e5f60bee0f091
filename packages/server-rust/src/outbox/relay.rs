//! Background relay that re-publishes pending outbox entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::config::OutboxConfig;
use super::coordinator::{deliver_entry, DeliveryOutcome};
use crate::service::registry::{ManagedService, ServiceContext};
use crate::service::worker::{PeriodicTask, PeriodicWorker, WorkerConfig};
use crate::storage::now_millis;
use crate::traits::{EventPublisher, OutboxStore};

/// Tasks accepted by the relay worker.
#[derive(Debug)]
pub enum RelayTask {
    /// Sweep now, ignoring the grace interval. The report is sent back on
    /// `reply` when present.
    Flush {
        reply: Option<oneshot::Sender<SweepReport>>,
    },
}

/// Counts from one relay sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Entries that reached the attempt limit during this sweep.
    pub stuck: usize,
}

/// Relay state owned by the worker task.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
    /// Stuck alerts raised since start.
    stuck_total: usize,
}

impl OutboxRelay {
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
            stuck_total: 0,
        }
    }

    /// Re-publishes pending entries created at least `grace_ms` ago that
    /// are still below the attempt limit.
    pub async fn sweep(&mut self, grace_ms: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = now_millis().saturating_sub(i64::try_from(grace_ms).unwrap_or(i64::MAX));

        let entries = match self
            .outbox
            .pending_before(cutoff, self.config.max_attempts, self.config.batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "outbox sweep could not list pending entries");
                return report;
            }
        };
        report.scanned = entries.len();

        for entry in entries {
            let outcome = deliver_entry(
                self.publisher.as_ref(),
                self.outbox.as_ref(),
                &entry,
                &self.config,
            )
            .await;
            match outcome {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::PublishedUnmarked | DeliveryOutcome::Failed => report.failed += 1,
                DeliveryOutcome::Exhausted => {
                    report.failed += 1;
                    report.stuck += 1;
                }
            }
        }
        self.stuck_total += report.stuck;

        if report.scanned > 0 {
            debug!(?report, "outbox sweep finished");
        }
        report
    }
}

#[async_trait]
impl PeriodicTask for OutboxRelay {
    type Request = RelayTask;

    async fn handle(&mut self, task: RelayTask) {
        match task {
            RelayTask::Flush { reply } => {
                let report = self.sweep(0).await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
        }
    }

    async fn tick(&mut self) {
        self.sweep(self.config.grace_ms).await;
    }

    async fn finish(&mut self) {
        info!(stuck = self.stuck_total, "outbox relay stopped");
    }
}

// ---------------------------------------------------------------------------
// OutboxRelayService
// ---------------------------------------------------------------------------

/// Managed service that owns the relay worker.
pub struct OutboxRelayService {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
    worker: Mutex<Option<PeriodicWorker<OutboxRelay>>>,
}

impl OutboxRelayService {
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
            worker: Mutex::new(None),
        }
    }

    /// Sweeps immediately and waits for the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay is not running.
    pub async fn flush(&self) -> anyhow::Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        {
            let worker = self.worker.lock().await;
            let worker = worker
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("outbox relay not running"))?;
            worker.submit(RelayTask::Flush { reply: Some(tx) }).await?;
        }
        Ok(rx.await?)
    }

    /// Number of entries still waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns the store error if the count cannot be read.
    pub async fn pending_count(&self) -> anyhow::Result<u64> {
        Ok(self.outbox.pending_count().await?)
    }
}

#[async_trait]
impl ManagedService for OutboxRelayService {
    fn name(&self) -> &'static str {
        "outbox-relay"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_none() {
            let relay = OutboxRelay::new(
                Arc::clone(&self.outbox),
                Arc::clone(&self.publisher),
                self.config.clone(),
            );
            let interval = Duration::from_millis(self.config.relay_interval_ms);
            *worker = Some(PeriodicWorker::spawn(
                relay,
                WorkerConfig::new("outbox-relay", interval),
            ));
            info!(
                interval_ms = self.config.relay_interval_ms,
                grace_ms = self.config.grace_ms,
                max_attempts = self.config.max_attempts,
                "outbox relay started"
            );
        }
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        if let Some(mut worker) = self.worker.lock().await.take() {
            worker.stop().await;
        }
        Ok(())
    }
}
