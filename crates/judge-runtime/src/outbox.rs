//! Outbox Publisher (§4.4): polls `outbox_events` rows a submission worker
//! committed in the same transaction as its terminal verdict, and relays
//! each one onto the broker via [`judge_queue::EventPublisher`].
//!
//! Shaped like [`judge_reconcile`]'s reclaim scan: a stateless tick function
//! the caller can unit-test directly, plus a thin loop that owns the
//! interval. Backoff and retry-cap escalation are computed inside
//! `judge_db::outbox_mark_failed` itself (§8 invariant 2) — this module only
//! decides what to do with the result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use judge_audit::AuditWriter;
use judge_queue::EventPublisher;

/// What a single publish tick did, broken out by what happened to each
/// claimed row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishTickOutcome {
    pub published: Vec<Uuid>,
    pub retried: Vec<Uuid>,
    pub escalated: Vec<Uuid>,
}

impl PublishTickOutcome {
    pub fn is_clean(&self) -> bool {
        self.retried.is_empty() && self.escalated.is_empty()
    }
}

/// Polls and relays outbox rows for one logical publisher process. `P` is
/// the broker leg — `judge_queue::AmqpDispatchQueue` in production,
/// `judge_queue::FakeQueue` in tests.
pub struct OutboxPublisher<P: EventPublisher> {
    db: PgPool,
    broker: Arc<P>,
    publisher_id: String,
    batch_size: i64,
    audit: Option<Arc<Mutex<AuditWriter>>>,
}

impl<P: EventPublisher> OutboxPublisher<P> {
    pub fn new(db: PgPool, broker: Arc<P>, publisher_id: String, batch_size: i64) -> Self {
        Self { db, broker, publisher_id, batch_size, audit: None }
    }

    /// Attach an ambient hash-chained audit trail (§9 design notes) that
    /// records every publish/fail/escalate decision independent of the
    /// `outbox_events` row itself.
    pub fn with_audit(mut self, audit: Arc<Mutex<AuditWriter>>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Claim up to `batch_size` ready rows and attempt to publish each one
    /// (§4.4 steps 1-4). Safe to call concurrently from more than one
    /// publisher process: `outbox_claim_batch` uses `FOR UPDATE SKIP
    /// LOCKED`, so two publishers never claim the same row.
    pub async fn publish_tick(&self) -> Result<PublishTickOutcome> {
        let batch = judge_db::outbox_claim_batch(&self.db, self.batch_size, &self.publisher_id)
            .await
            .context("publish_tick: outbox_claim_batch failed")?;

        let mut outcome = PublishTickOutcome::default();

        for event in batch {
            match self.broker.publish_event(&event).await {
                Ok(()) => {
                    judge_db::outbox_mark_published(&self.db, event.event_id)
                        .await
                        .context("publish_tick: outbox_mark_published failed")?;
                    self.audit_event(event.event_id, "outbox.published", json!({
                        "event_type": event.event_type,
                        "aggregate_id": event.aggregate_id,
                    }))
                    .await;
                    outcome.published.push(event.event_id);
                }
                Err(err) => {
                    let updated = judge_db::outbox_mark_failed(&self.db, event.event_id, &err.to_string())
                        .await
                        .context("publish_tick: outbox_mark_failed failed")?;

                    if updated.next_retry_at.is_none() {
                        tracing::error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            retry_count = updated.retry_count,
                            "outbox event escalated after exhausting its retry budget"
                        );
                        self.audit_event(event.event_id, "outbox.escalated", json!({
                            "event_type": event.event_type,
                            "retry_count": updated.retry_count,
                            "last_error": err.to_string(),
                        }))
                        .await;
                        outcome.escalated.push(event.event_id);
                    } else {
                        tracing::warn!(
                            event_id = %event.event_id,
                            retry_count = updated.retry_count,
                            next_retry_at = ?updated.next_retry_at,
                            error = %err,
                            "outbox publish failed, scheduled for retry"
                        );
                        self.audit_event(event.event_id, "outbox.publish_failed", json!({
                            "retry_count": updated.retry_count,
                            "error": err.to_string(),
                        }))
                        .await;
                        outcome.retried.push(event.event_id);
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn audit_event(&self, event_id: Uuid, event_type: &str, payload: serde_json::Value) {
        let Some(audit) = &self.audit else { return };
        let mut writer = audit.lock().await;
        if let Err(err) = writer.append(event_id, "outbox", event_type, payload) {
            tracing::error!(error = %err, "failed to append outbox audit event");
        }
    }
}

/// Run [`OutboxPublisher::publish_tick`] forever on `poll_interval`.
/// Intended to run as its own background task alongside the Judge Worker
/// Pool and the reclaim loop (§4.4 "the outbox publisher is a separate
/// process/task from the workers that write to the outbox").
pub async fn run_outbox_loop<P: EventPublisher + Send + Sync + 'static>(
    publisher: Arc<OutboxPublisher<P>>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match publisher.publish_tick().await {
            Ok(outcome) if !outcome.is_clean() => {
                tracing::debug!(
                    published = outcome.published.len(),
                    retried = outcome.retried.len(),
                    escalated = outcome.escalated.len(),
                    "outbox tick"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "outbox publish tick failed"),
        }
    }
}
