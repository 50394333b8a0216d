//! Worker heartbeat reclaim scan (§8 invariant 4): a periodic tick,
//! independent of the worker pool's own dispatch loop, that reverts
//! submissions stuck `judging` with a stale heartbeat back to `pending` so a
//! crashed worker never leaves a submission un-judged forever.
//!
//! Shaped the way the pool's own drift checks are shaped elsewhere in this
//! workspace: a stateless tick function the caller invokes on an interval,
//! plus a thin loop that owns the interval and reports what each tick did.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;

/// What a single reclaim tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub reclaimed_submission_ids: Vec<i64>,
}

impl ReclaimOutcome {
    pub fn is_clean(&self) -> bool {
        self.reclaimed_submission_ids.is_empty()
    }
}

/// Run a single reclaim tick: find every `judging` submission whose
/// heartbeat is older than `staleness_secs` and revert it to `pending`.
///
/// Stateless and idempotent — safe to call from more than one process, since
/// [`judge_db::reclaim_stale_submissions`] itself uses a conditional
/// `update ... where` clause rather than a claim-and-hold pattern.
pub async fn reclaim_tick(pool: &PgPool, staleness_secs: i64) -> Result<ReclaimOutcome> {
    let reclaimed_submission_ids = judge_db::reclaim_stale_submissions(pool, staleness_secs)
        .await
        .context("reclaim_tick: reclaim_stale_submissions failed")?;

    if !reclaimed_submission_ids.is_empty() {
        tracing::warn!(
            count = reclaimed_submission_ids.len(),
            ids = ?reclaimed_submission_ids,
            "reclaimed stale judging submissions back to pending"
        );
    }

    Ok(ReclaimOutcome { reclaimed_submission_ids })
}

/// Run [`reclaim_tick`] forever on `poll_interval`, logging each outcome.
/// Intended to run as its own background task alongside the Judge Worker
/// Pool and the Outbox Publisher, not inside either of their loops — a
/// worker crash must not prevent reclaim from running.
pub async fn run_reclaim_loop(pool: PgPool, staleness_secs: i64, poll_interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if let Err(err) = reclaim_tick(&pool, staleness_secs).await {
            tracing::error!(error = %err, "reclaim tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_outcome_has_no_reclaimed_ids() {
        let outcome = ReclaimOutcome {
            reclaimed_submission_ids: Vec::new(),
        };
        assert!(outcome.is_clean());
    }

    #[test]
    fn nonempty_outcome_is_not_clean() {
        let outcome = ReclaimOutcome {
            reclaimed_submission_ids: vec![1, 2],
        };
        assert!(!outcome.is_clean());
    }
}
