//! In-memory stand-in for [`AmqpDispatchQueue`], for tests that exercise
//! worker-pool and outbox-publisher logic without a real broker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use judge_schemas::{DispatchMessage, EventEnvelope, OutboxEvent};

use crate::{envelope_for, Delivery, EventPublisher, QueueConsumer, QueueError, QueuePublisher, MAX_REDELIVERIES};

struct Envelope {
    message: DispatchMessage,
    redelivery_count: u32,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<Envelope>>,
    dead_letters: Mutex<Vec<(DispatchMessage, String)>>,
    published_events: Mutex<Vec<EventEnvelope<serde_json::Value>>>,
}

/// A single in-process queue: `publish` pushes to the back, `next_delivery`
/// pops from the front, `requeue` pushes back to the back (so a redelivered
/// message doesn't simply spin at the head forever). Messages that exceed
/// [`MAX_REDELIVERIES`] land in `dead_letters` instead of back on the queue.
///
/// Cheaply cloneable (an `Arc` around shared state) so a publisher handle and
/// a consumer can each own their own copy.
#[derive(Clone, Default)]
pub struct FakeQueue {
    shared: Arc<Shared>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of messages routed to the dead-letter queue, oldest first,
    /// paired with the reason each was dead-lettered.
    pub fn dead_letters(&self) -> Vec<(DispatchMessage, String)> {
        self.shared.dead_letters.lock().unwrap().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    /// A consumer handle over the same underlying queue.
    pub fn consumer(&self) -> FakeConsumer {
        FakeConsumer { shared: self.shared.clone() }
    }

    /// Envelopes published via [`EventPublisher::publish_event`], oldest first.
    pub fn published_events(&self) -> Vec<EventEnvelope<serde_json::Value>> {
        self.shared.published_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueuePublisher for FakeQueue {
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        self.shared.pending.lock().unwrap().push_back(Envelope {
            message: message.clone(),
            redelivery_count: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for FakeQueue {
    async fn publish_event(&self, event: &OutboxEvent) -> Result<(), QueueError> {
        self.shared.published_events.lock().unwrap().push(envelope_for(event));
        Ok(())
    }
}

pub struct FakeConsumer {
    shared: Arc<Shared>,
}

#[async_trait]
impl QueueConsumer for FakeConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        let envelope = self.shared.pending.lock().unwrap().pop_front();
        Ok(envelope.map(|envelope| {
            Box::new(FakeDelivery { shared: self.shared.clone(), envelope: Some(envelope) })
                as Box<dyn Delivery>
        }))
    }
}

struct FakeDelivery {
    shared: Arc<Shared>,
    envelope: Option<Envelope>,
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn message(&self) -> &DispatchMessage {
        &self.envelope.as_ref().expect("envelope consumed").message
    }

    fn redelivery_count(&self) -> u32 {
        self.envelope.as_ref().expect("envelope consumed").redelivery_count
    }

    async fn ack(mut self: Box<Self>) -> Result<(), QueueError> {
        self.envelope.take();
        Ok(())
    }

    async fn requeue(mut self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        let mut envelope = self.envelope.take().expect("envelope consumed");
        if envelope.redelivery_count + 1 > MAX_REDELIVERIES {
            self.shared.dead_letters.lock().unwrap().push((envelope.message, reason.to_string()));
            return Ok(());
        }
        envelope.redelivery_count += 1;
        self.shared.pending.lock().unwrap().push_back(envelope);
        Ok(())
    }

    async fn dead_letter(mut self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        let envelope = self.envelope.take().expect("envelope consumed");
        self.shared.dead_letters.lock().unwrap().push((envelope.message, reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(submission_id: i64) -> DispatchMessage {
        DispatchMessage { submission_id, problem_id: 1, language: "cpp17".to_string() }
    }

    #[tokio::test]
    async fn publish_then_consume_round_trips_a_message() {
        let queue = FakeQueue::new();
        queue.publish(&msg(1)).await.unwrap();

        let mut consumer = queue.consumer();
        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message().submission_id, 1);
        assert_eq!(delivery.redelivery_count(), 0);
        delivery.ack().await.unwrap();

        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn requeue_increments_redelivery_count_and_goes_to_the_back() {
        let queue = FakeQueue::new();
        queue.publish(&msg(1)).await.unwrap();
        queue.publish(&msg(2)).await.unwrap();

        let mut consumer = queue.consumer();
        let first = consumer.next_delivery().await.unwrap().unwrap();
        first.requeue("heartbeat stalled").await.unwrap();

        let second = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(second.message().submission_id, 2);

        let redelivered = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(redelivered.message().submission_id, 1);
        assert_eq!(redelivered.redelivery_count(), 1);
    }

    #[tokio::test]
    async fn requeue_past_the_redelivery_cap_dead_letters_instead() {
        let queue = FakeQueue::new();
        queue.publish(&msg(1)).await.unwrap();
        let mut consumer = queue.consumer();

        for _ in 0..=MAX_REDELIVERIES {
            let delivery = consumer.next_delivery().await.unwrap().unwrap();
            delivery.requeue("poison message").await.unwrap();
        }

        assert_eq!(queue.pending_len(), 0);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.submission_id, 1);
        assert_eq!(dead[0].1, "poison message");
    }

    #[tokio::test]
    async fn dead_letter_skips_redelivery_entirely() {
        let queue = FakeQueue::new();
        queue.publish(&msg(1)).await.unwrap();

        let mut consumer = queue.consumer();
        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        delivery.dead_letter("decode error").await.unwrap();

        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn next_delivery_on_an_empty_queue_returns_none() {
        let queue = FakeQueue::new();
        let mut consumer = queue.consumer();
        assert!(consumer.next_delivery().await.unwrap().is_none());
    }
}
