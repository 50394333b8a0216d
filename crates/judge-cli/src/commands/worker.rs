//! `judge worker run`: boots the Judge Worker Pool (§4.2) — one sandbox
//! slot + one dedicated dispatch-queue consumer per worker, driven by
//! [`judge_runtime::SubmissionWorkerPool`].
//!
//! Boots the pool-gate disarmed (§4.1 policy, §9 "Pool fail-closed
//! supervisor gate") unless `--arm` is passed; an operator can also arm a
//! running `judge-daemon`'s own gate over HTTP, but this process's gate is
//! its own instance and must be armed on its own terms.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use judge_blobstore::{BlobFetcher, ObjectStoreBlobFetcher};
use judge_execution::DispatchGateway;
use judge_integrity::PoolGate;
use judge_profiles::ProfileRegistry;
use judge_queue::{AmqpDispatchQueue, AmqpTopology, QueueConsumer};
use judge_risk::{ContentServiceClient, HttpContentServiceClient};
use judge_runtime::{SubmissionWorkerPool, WorkerPoolConfig};
use judge_sandbox_isolate::IsolateSandbox;

pub struct WorkerRunOpts {
    pub config_paths: Vec<String>,
    pub slots: Option<u32>,
    pub arm: bool,
}

pub async fn run(opts: WorkerRunOpts) -> Result<()> {
    let cfg = judge_config::EnvConfig::from_env().context("worker run: loading env config")?;

    let db = judge_db::connect_from_env()
        .await
        .context("worker run: connecting to submission store")?;
    judge_db::migrate(&db).await.context("worker run: migrate failed")?;

    let path_refs: Vec<&std::path::Path> =
        opts.config_paths.iter().map(|p| std::path::Path::new(p.as_str())).collect();
    let loaded = judge_config::load_layered_yaml(&path_refs)
        .context("worker run: loading language profile registry")?;
    let registry = Arc::new(
        ProfileRegistry::from_loaded_config(&loaded).context("worker run: building profile registry")?,
    );

    let sandbox = IsolateSandbox::new(cfg.sandbox_bin.clone());
    let gateway = Arc::new(DispatchGateway::new(sandbox));

    let blobs: Arc<dyn BlobFetcher> = Arc::new(
        ObjectStoreBlobFetcher::from_env(&cfg).map_err(|e| anyhow::anyhow!("worker run: blob store: {e}"))?,
    );
    let content: Arc<dyn ContentServiceClient> =
        Arc::new(HttpContentServiceClient::new(cfg.content_service_url.clone()));

    let gate = Arc::new(RwLock::new(PoolGate::boot()));
    if opts.arm {
        gate.write().await.arm();
        tracing::info!("pool armed at start (--arm passed)");
    } else {
        tracing::warn!(
            "pool boots disarmed; pass --arm to dispatch immediately, or arm the daemon's gate via POST /v1/pool/arm"
        );
    }

    let slots = opts.slots.unwrap_or(cfg.worker_count).max(1);

    let queue = AmqpDispatchQueue::connect(&cfg.broker_url, AmqpTopology::default())
        .await
        .map_err(|e| anyhow::anyhow!("worker run: connecting to dispatch queue: {e}"))?;

    let mut consumers: Vec<Box<dyn QueueConsumer>> = Vec::with_capacity(slots as usize);
    for slot in 0..slots {
        let consumer = queue
            .consume(&format!("judge-worker-{slot}"))
            .await
            .map_err(|e| anyhow::anyhow!("worker run: opening consumer for slot {slot}: {e}"))?;
        consumers.push(Box::new(consumer));
    }

    let pool = Arc::new(SubmissionWorkerPool::new(
        gateway,
        db,
        blobs,
        content,
        registry,
        gate,
        WorkerPoolConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, draining in-flight submissions");
            shutdown_trigger.cancel();
        }
    });

    pool.run(consumers, shutdown).await;
    println!("worker pool shut down cleanly, slots={slots}");

    Ok(())
}
