//! Dispatch Queue (§4.3): the durable work queue carrying `judge-submission`
//! tasks from the API layer to the Judge Worker Pool, plus the broker leg of
//! the Outbox Publisher (§4.4) — both publish through a topic exchange, so
//! they share one connection/channel abstraction here.
//!
//! Grounded on the same `lapin` consume/ack loop shape used elsewhere in
//! this corpus for judge-style task queues (topic exchange, persistent
//! messages, bounded prefetch, explicit ack/nack) — see DESIGN.md.

use async_trait::async_trait;
use judge_schemas::{DispatchMessage, EventEnvelope, OutboxEvent};

#[cfg(feature = "testkit")]
mod fake;
#[cfg(feature = "testkit")]
pub use fake::{FakeConsumer, FakeQueue};

mod amqp;
pub use amqp::{AmqpDispatchQueue, AmqpTopology};

/// Redeliveries beyond this count route a message to the dead-letter queue
/// instead of back onto the work queue (§4.3 "poison messages ... routed to
/// a dead-letter queue").
pub const MAX_REDELIVERIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Connection(String),
    Publish(String),
    Consume(String),
    Decode(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Connection(m) => write!(f, "queue connection error: {m}"),
            QueueError::Publish(m) => write!(f, "queue publish error: {m}"),
            QueueError::Consume(m) => write!(f, "queue consume error: {m}"),
            QueueError::Decode(m) => write!(f, "queue message decode error: {m}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// One message pulled off the dispatch queue, not yet resolved. A worker
/// (or the fake used in tests) must end every delivery's life with exactly
/// one of `ack`, `requeue`, or `dead_letter`.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &DispatchMessage;

    /// How many times this exact message has been redelivered before this
    /// attempt (0 on first delivery).
    fn redelivery_count(&self) -> u32;

    /// Acknowledge successful processing (§4.2 step 5 "ack the message").
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Return the message to the queue for another worker to pick up
    /// (§4.2 "on deadline, the worker negative-acks so the broker
    /// redelivers"). Routes to the dead-letter queue instead, tagged with
    /// `reason`, once [`MAX_REDELIVERIES`] is exceeded.
    async fn requeue(self: Box<Self>, reason: &str) -> Result<(), QueueError>;

    /// Route straight to the dead-letter queue regardless of redelivery
    /// count (a parse failure — §4.3 "poison messages (parse failure ...)").
    async fn dead_letter(self: Box<Self>, reason: &str) -> Result<(), QueueError>;
}

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish a dispatch message persistently, routing-key =
    /// [`judge_schemas::DISPATCH_ROUTING_KEY`], message-id = submission id
    /// (§6).
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError>;
}

#[async_trait]
pub trait QueueConsumer: Send {
    /// Pull the next delivery, or `None` if the consumer was cancelled
    /// (e.g. pool shutdown — §4.2 "Cancellation").
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError>;
}

/// The broker leg of the Outbox Publisher (§4.4 step 3): wraps one
/// [`OutboxEvent`] in the wire envelope and publishes it persistently,
/// routing-key = `event.event_type`, headers = {event-type, aggregate-id,
/// aggregate-type, message-id = event_id}, content-type application/json.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, event: &OutboxEvent) -> Result<(), QueueError>;
}

/// Build the envelope `{event_type, event_id, data, timestamp}` published
/// on the topic exchange (§6 "Outbox envelope").
pub fn envelope_for(event: &OutboxEvent) -> EventEnvelope<serde_json::Value> {
    EventEnvelope {
        event_type: event.event_type.clone(),
        event_id: event.event_id,
        data: event.payload.clone(),
        timestamp: chrono::Utc::now(),
    }
}
