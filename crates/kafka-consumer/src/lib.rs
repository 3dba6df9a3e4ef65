//! Kafka subscription loop with offset-on-success semantics.
//!
//! For every fetched message the user handler runs first; only a successful
//! handler commits the offset, so a crash or a transient failure redelivers
//! the message. Handlers must therefore treat permanent problems (malformed
//! payloads, impossible transitions) as success after logging them, or the
//! message becomes a poison pill.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

/// A processor for one raw bus message.
///
/// Return `Ok` to commit the offset. Return `Err` only for transient faults
/// that a redelivery can heal.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, key: &[u8], payload: &[u8]) -> Result<()>;
}

/// A long-lived subscription to one (topic, group) pair.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    /// Creates a consumer subscribed to `topic` under `group_id`.
    ///
    /// Auto-commit is off: offsets move only after the handler succeeds.
    pub fn new(brokers: &[String], topic: &str, group_id: &str) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()?;

        consumer.subscribe(&[topic])?;
        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    /// Runs the consumption loop until the shutdown signal fires.
    ///
    /// Fetch errors back off for a second and retry; handler errors skip the
    /// commit so the message comes back.
    pub async fn run<H: EventHandler>(&self, handler: &H, shutdown: Arc<tokio::sync::Notify>) {
        info!("consuming topic {}", self.topic);
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    match maybe_msg {
                        Some(Ok(msg)) => {
                            let key = msg.key().unwrap_or_default();
                            let payload = msg.payload().unwrap_or_default();

                            match handler.handle(key, payload).await {
                                Ok(()) => {
                                    if let Err(e) =
                                        self.consumer.commit_message(&msg, CommitMode::Async)
                                    {
                                        error!("commit error on {}: {e}", self.topic);
                                    }
                                }
                                Err(e) => {
                                    // No commit: the message will be redelivered.
                                    error!("handler error on {}: {e}", self.topic);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!("fetch error on {}: {e}", self.topic);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            debug!("stream for {} ended", self.topic);
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("consumer for {} received shutdown signal", self.topic);
                    break;
                }
            }
        }
    }
}
