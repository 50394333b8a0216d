//! `lapin`-backed implementation: a topic exchange carrying both the
//! `judge-submission` dispatch queue and the outbox publisher's event
//! envelopes, with a matching dead-letter exchange/queue pair.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::{envelope_for, Delivery, EventPublisher, QueueConsumer, QueueError, QueuePublisher, MAX_REDELIVERIES};
use judge_schemas::{DispatchMessage, OutboxEvent};

const REDELIVERY_HEADER: &str = "x-redelivery-count";

/// Names of the exchange/queue topology the judge core expects to exist
/// (§4.3 "durable topic-exchange queue", §4.3 dead-letter queue).
#[derive(Debug, Clone)]
pub struct AmqpTopology {
    pub exchange: String,
    pub queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
}

impl Default for AmqpTopology {
    fn default() -> Self {
        Self {
            exchange: "judge.topic".to_string(),
            queue: "judge.dispatch".to_string(),
            dead_letter_exchange: "judge.dead-letter".to_string(),
            dead_letter_queue: "judge.dispatch.dead-letter".to_string(),
        }
    }
}

pub struct AmqpDispatchQueue {
    channel: Channel,
    topology: AmqpTopology,
}

impl AmqpDispatchQueue {
    pub async fn connect(broker_url: &str, topology: AmqpTopology) -> Result<Self, QueueError> {
        let connection = Connection::connect(broker_url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let queue = Self { channel, topology };
        queue.declare_topology().await?;
        Ok(queue)
    }

    async fn declare_topology(&self) -> Result<(), QueueError> {
        self.channel
            .exchange_declare(
                &self.topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        self.channel
            .exchange_declare(
                &self.topology.dead_letter_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.topology.dead_letter_exchange.clone().into()),
        );

        self.channel
            .queue_declare(
                &self.topology.queue,
                QueueDeclareOptions { durable: true, ..Default::default() },
                args,
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        self.channel
            .queue_declare(
                &self.topology.dead_letter_queue,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        self.channel
            .queue_bind(
                &self.topology.queue,
                &self.topology.exchange,
                judge_schemas::DISPATCH_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        self.channel
            .queue_bind(
                &self.topology.dead_letter_queue,
                &self.topology.dead_letter_exchange,
                "#",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(())
    }

    /// Open a consumer on the dispatch queue with prefetch = 1 (§4.2
    /// "workers set prefetch = 1 per connection to ensure fair dispatch").
    pub async fn consume(&self, consumer_tag: &str) -> Result<AmqpConsumer, QueueError> {
        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let consumer = self
            .channel
            .basic_consume(
                &self.topology.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        Ok(AmqpConsumer {
            channel: self.channel.clone(),
            exchange: self.topology.exchange.clone(),
            dead_letter_exchange: self.topology.dead_letter_exchange.clone(),
            inner: consumer,
        })
    }
}

#[async_trait]
impl QueuePublisher for AmqpDispatchQueue {
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        let body = serde_json::to_vec(message).map_err(|e| QueueError::Publish(e.to_string()))?;

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into())
            .with_message_id(message.submission_id.to_string().into());

        self.channel
            .basic_publish(
                &self.topology.exchange,
                judge_schemas::DISPATCH_ROUTING_KEY,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// The broker leg of the Outbox Publisher (§4.4 step 3): publishes on the
/// SAME topic exchange the dispatch queue is bound to, but routed by
/// `event.event_type` instead of the fixed dispatch routing key, and
/// carrying the envelope headers a downstream consumer dedupes on.
#[async_trait]
impl EventPublisher for AmqpDispatchQueue {
    async fn publish_event(&self, event: &OutboxEvent) -> Result<(), QueueError> {
        let envelope = envelope_for(event);
        let body = serde_json::to_vec(&envelope).map_err(|e| QueueError::Publish(e.to_string()))?;

        let mut headers = FieldTable::default();
        headers.insert("event-type".into(), AMQPValue::LongString(event.event_type.clone().into()));
        headers.insert("aggregate-id".into(), AMQPValue::LongLongInt(event.aggregate_id));
        headers.insert("aggregate-type".into(), AMQPValue::LongString(event.aggregate_type.clone().into()));
        headers.insert("message-id".into(), AMQPValue::LongString(event.event_id.to_string().into()));

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into())
            .with_message_id(event.event_id.to_string().into())
            .with_headers(headers);

        self.channel
            .basic_publish(
                &self.topology.exchange,
                &event.event_type,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }
}

pub struct AmqpConsumer {
    channel: Channel,
    exchange: String,
    dead_letter_exchange: String,
    inner: lapin::Consumer,
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(QueueError::Consume(e.to_string())),
            Some(Ok(raw)) => {
                let redelivery_count = raw
                    .properties
                    .headers()
                    .as_ref()
                    .and_then(|headers| headers.inner().get(REDELIVERY_HEADER))
                    .and_then(|value| match value {
                        AMQPValue::LongInt(n) => Some(*n as u32),
                        AMQPValue::LongUInt(n) => Some(*n),
                        _ => None,
                    })
                    .unwrap_or(0);

                let message: DispatchMessage = match serde_json::from_slice(&raw.data) {
                    Ok(m) => m,
                    Err(e) => {
                        let delivery = AmqpDelivery {
                            message: None,
                            redelivery_count,
                            raw,
                            channel: self.channel.clone(),
                            exchange: self.exchange.clone(),
                            dead_letter_exchange: self.dead_letter_exchange.clone(),
                        };
                        return delivery.dead_letter(&format!("decode error: {e}")).await.map(|_| None);
                    }
                };

                Ok(Some(Box::new(AmqpDelivery {
                    message: Some(message),
                    redelivery_count,
                    raw,
                    channel: self.channel.clone(),
                    exchange: self.exchange.clone(),
                    dead_letter_exchange: self.dead_letter_exchange.clone(),
                })))
            }
        }
    }
}

struct AmqpDelivery {
    message: Option<DispatchMessage>,
    redelivery_count: u32,
    raw: lapin::message::Delivery,
    channel: Channel,
    exchange: String,
    dead_letter_exchange: String,
}

impl AmqpDelivery {
    fn message_ref(&self) -> &DispatchMessage {
        self.message
            .as_ref()
            .expect("message() must not be called on an undecodable delivery")
    }
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn message(&self) -> &DispatchMessage {
        self.message_ref()
    }

    fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.raw
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))
    }

    async fn requeue(self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        if self.redelivery_count + 1 > MAX_REDELIVERIES {
            return self.dead_letter(reason).await;
        }

        let body = self.raw.data.clone();
        let mut headers = self
            .raw
            .properties
            .headers()
            .clone()
            .unwrap_or_else(FieldTable::default);
        headers.insert(REDELIVERY_HEADER.into(), AMQPValue::LongUInt(self.redelivery_count + 1));

        let properties = self.raw.properties.clone().with_headers(headers);

        self.channel
            .basic_publish(
                &self.exchange,
                judge_schemas::DISPATCH_ROUTING_KEY,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        self.raw
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))
    }

    async fn dead_letter(self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        let mut headers = self
            .raw
            .properties
            .headers()
            .clone()
            .unwrap_or_else(FieldTable::default);
        headers.insert("x-dead-letter-reason".into(), AMQPValue::LongString(reason.to_string().into()));
        let properties = self.raw.properties.clone().with_headers(headers);

        self.channel
            .basic_publish(
                &self.dead_letter_exchange,
                "#",
                BasicPublishOptions::default(),
                &self.raw.data,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        // Nack without requeue: the broker-side routing to the DLQ above
        // already reinserted the message, so this delivery must not also be
        // redelivered on this queue.
        self.raw
            .nack(BasicNackOptions { requeue: false, ..Default::default() })
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))
    }
}
