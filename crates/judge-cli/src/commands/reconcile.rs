//! `judge reconcile run`: reclaims submissions orphaned by a worker that
//! stopped heartbeating (§4.7 "Worker heartbeat staleness reclaim").

use std::time::Duration;

use anyhow::{Context, Result};

pub struct ReconcileRunOpts {
    pub staleness_secs: Option<u64>,
    pub tick_interval_secs: Option<u64>,
}

pub async fn run(opts: ReconcileRunOpts) -> Result<()> {
    let cfg = judge_config::EnvConfig::from_env().context("reconcile run: loading env config")?;

    let db = judge_db::connect_from_env()
        .await
        .context("reconcile run: connecting to submission store")?;
    judge_db::migrate(&db).await.context("reconcile run: migrate failed")?;

    let staleness_secs = i64::try_from(opts.staleness_secs.unwrap_or(cfg.worker_staleness_secs))
        .context("reconcile run: staleness_secs out of range")?;
    let tick_interval = Duration::from_secs(opts.tick_interval_secs.unwrap_or(15));

    tracing::info!(
        staleness_secs,
        tick_interval_secs = tick_interval.as_secs(),
        "reclaim loop starting"
    );

    tokio::select! {
        res = judge_reconcile::run_reclaim_loop(db, staleness_secs, tick_interval) => {
            res.context("reconcile run: reclaim loop failed")?;
            tracing::warn!("reclaim loop returned unexpectedly");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("reconcile run: waiting for ctrl_c")?;
            tracing::info!("shutdown signal received");
        }
    }

    println!("reclaim loop shut down cleanly");
    Ok(())
}
