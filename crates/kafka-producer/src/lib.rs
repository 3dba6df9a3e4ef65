//! Kafka publisher with envelope wrapping.
//!
//! Every payload handed in is wrapped into a fresh [`model::Envelope`] (new
//! event id, now-UTC timestamp) and written as one message keyed by the event
//! type, which gives consumers per-type partial ordering. Writes are
//! synchronous with a small (~10 ms) batching window in the producer.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use model::Envelope;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, error};

/// Kafka-backed implementation of the outbox publisher seam.
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    /// Creates a producer for the given brokers.
    pub fn new(brokers: &[String]) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            // Small batching window: writes stay synchronous for the caller.
            .set("queue.buffering.max.ms", "10")
            .create()
            .context("Failed to create Kafka producer")?;

        Ok(Self { producer })
    }

    /// Wraps `payload` into a fresh envelope and publishes it to `topic` with
    /// key = `event_type`.
    pub async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let envelope = Envelope::wrap(event_type, payload.clone());
        let raw = serde_json::to_vec(&envelope).context("Failed to serialize envelope")?;

        let record = FutureRecord::to(topic).key(event_type).payload(&raw);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => {
                debug!(
                    event_id = %envelope.event_id,
                    "published {event_type} to {topic}"
                );
                Ok(())
            }
            Err((kafka_err, _owned_msg)) => {
                error!("failed to publish {event_type} to {topic}: {kafka_err}");
                Err(kafka_err).context("Failed to send message to Kafka")
            }
        }
    }
}

#[async_trait]
impl outbox::EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        KafkaPublisher::publish(self, topic, event_type, payload).await
    }
}
