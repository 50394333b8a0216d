//! Judge Worker Pool (§4.2, §5): a fixed number of workers, each bound to
//! its own deterministic sandbox slot and its own dedicated queue consumer,
//! pulling `judge-submission` dispatch messages and driving them through
//! [`crate::worker::SubmissionWorker`].
//!
//! One task per slot, no work-stealing between slots — the same
//! "one goroutine per engine, no shared mutable state" shape this corpus
//! uses elsewhere for isolating per-unit execution state. Bounded prefetch
//! falls out of this for free: a slot's task never asks the queue for
//! another delivery until the one in hand has been acked, requeued, or
//! dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use judge_blobstore::BlobFetcher;
use judge_execution::gateway::DispatchGateway;
use judge_execution::sandbox::Sandbox;
use judge_execution::slot_registry::SlotId;
use judge_integrity::PoolGate;
use judge_profiles::ProfileRegistry;
use judge_queue::{Delivery, QueueConsumer};
use judge_risk::ContentServiceClient;

use crate::worker::{SandboxUnavailable, SubmissionWorker, WorkerOutcome};

/// Tunables for the pool's run loop (§5).
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long `run` waits for in-flight deliveries to reach a terminal
    /// ack/requeue after `shutdown` fires before it returns anyway (§4.2
    /// "shutdown never kills a running test case below its wall-ms
    /// budget" — the grace period must exceed the longest test's wall
    /// limit plus compile time for this to hold in practice).
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { shutdown_grace: Duration::from_secs(30) }
    }
}

/// Owns every dependency the per-slot workers share: the DB pool, the
/// sandbox gateway, the blob/content clients, the language registry, and
/// the shared pool-gate verdict every `acquire`/`run` is evaluated against.
pub struct SubmissionWorkerPool<S: Sandbox> {
    gateway: Arc<DispatchGateway<S>>,
    db: PgPool,
    blobs: Arc<dyn BlobFetcher>,
    content: Arc<dyn ContentServiceClient>,
    registry: Arc<ProfileRegistry>,
    gate: Arc<RwLock<PoolGate>>,
    config: WorkerPoolConfig,
}

impl<S: Sandbox + Send + Sync + 'static> SubmissionWorkerPool<S>
where
    S::Box: Send,
{
    pub fn new(
        gateway: Arc<DispatchGateway<S>>,
        db: PgPool,
        blobs: Arc<dyn BlobFetcher>,
        content: Arc<dyn ContentServiceClient>,
        registry: Arc<ProfileRegistry>,
        gate: Arc<RwLock<PoolGate>>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self { gateway, db, blobs, content, registry, gate, config }
    }

    /// The pool-gate verdict every worker should evaluate its next
    /// acquire/run against, shared with whatever supervises arm/disarm
    /// (e.g. the daemon's `/v1/pool/arm` handler).
    pub fn gate(&self) -> Arc<RwLock<PoolGate>> {
        self.gate.clone()
    }

    /// Run one task per consumer, each bound to slot `index` in `consumers`.
    /// Returns once every slot's task has drained — either because
    /// `shutdown` fired and the grace period elapsed, or because every
    /// consumer returned `None` (the queue was cancelled out from under
    /// us, e.g. broker shutdown).
    pub async fn run(
        self: Arc<Self>,
        consumers: Vec<Box<dyn QueueConsumer>>,
        shutdown: CancellationToken,
    ) {
        let mut handles = Vec::with_capacity(consumers.len());

        for (index, consumer) in consumers.into_iter().enumerate() {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                this.run_slot(SlotId::new(index as i32), consumer, shutdown).await;
            }));
        }

        if tokio::time::timeout(self.config.shutdown_grace, futures_util::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::error!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "worker slots still draining past shutdown grace period, abandoning join"
            );
        }
    }

    async fn run_slot(
        &self,
        slot: SlotId,
        mut consumer: Box<dyn QueueConsumer>,
        shutdown: CancellationToken,
    ) {
        let worker_name = format!("worker-{}", slot.as_i32());

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(worker = %worker_name, "shutdown requested, stopping after current delivery");
                    break;
                }
                delivery = consumer.next_delivery() => delivery,
            };

            let delivery = match delivery {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    tracing::warn!(worker = %worker_name, "queue consumer closed, slot idling down");
                    break;
                }
                Err(err) => {
                    tracing::error!(worker = %worker_name, error = %err, "failed to pull next delivery");
                    continue;
                }
            };

            // Deliveries in flight when shutdown fires still run to
            // completion below (bounded by the sandbox's own wall-ms
            // limits) rather than being abandoned mid-test.
            self.handle_delivery(&worker_name, slot, delivery).await;
        }
    }

    async fn handle_delivery(&self, worker_name: &str, slot: SlotId, delivery: Box<dyn Delivery>) {
        let submission_id = delivery.message().submission_id;
        let verdict = self.gate.read().await.verdict();

        let worker = SubmissionWorker {
            worker_name: worker_name.to_string(),
            slot,
            pool: self.db.clone(),
            gateway: &self.gateway,
            blobs: self.blobs.as_ref(),
            content: self.content.as_ref(),
            registry: &self.registry,
        };

        let outcome = worker.process(submission_id, verdict).await;

        if let WorkerOutcome::Transient(err) = &outcome {
            if err.downcast_ref::<SandboxUnavailable>().is_some() {
                self.gate.write().await.record_acquire_result(false);
            }
        } else {
            self.gate.write().await.record_acquire_result(true);
        }

        match outcome {
            WorkerOutcome::Terminal(verdict) => {
                tracing::info!(%submission_id, ?verdict, worker = %worker_name, "submission reached terminal verdict");
                if let Err(err) = delivery.ack().await {
                    tracing::error!(%submission_id, error = %err, "ack failed after terminal verdict");
                }
            }
            WorkerOutcome::OwnedByAnother => {
                tracing::debug!(%submission_id, worker = %worker_name, "submission owned by another worker, dropping delivery");
                if let Err(err) = delivery.ack().await {
                    tracing::error!(%submission_id, error = %err, "ack failed for owned-by-another delivery");
                }
            }
            WorkerOutcome::Transient(err) => {
                tracing::warn!(%submission_id, error = %err, worker = %worker_name, "transient failure, requeuing");
                if let Err(err) = delivery.requeue(&err.to_string()).await {
                    tracing::error!(%submission_id, error = %err, "requeue failed after transient failure");
                }
            }
        }
    }
}
