//! Analytics ingestion of the order events topic.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kafka_consumer::EventHandler;
use model::Envelope;
use service::{AnalyticsService, AnalyticsServiceError};
use tracing::error;

/// Feeds every order event into the idempotent analytics sink.
pub struct AnalyticsIngestHandler {
    analytics: Arc<AnalyticsService>,
}

impl AnalyticsIngestHandler {
    pub fn new(analytics: Arc<AnalyticsService>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl EventHandler for AnalyticsIngestHandler {
    async fn handle(&self, _key: &[u8], payload: &[u8]) -> Result<()> {
        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(env) => env,
            Err(e) => {
                error!("failed to parse envelope: {e}");
                return Ok(());
            }
        };

        match self.analytics.record_envelope(&envelope).await {
            Ok(_) => Ok(()),
            // A payload that does not match its event type will never parse;
            // redelivering it would only loop.
            Err(AnalyticsServiceError::Decode(e)) => {
                error!("failed to parse payload: {e}");
                Ok(())
            }
            Err(e) => {
                error!("failed to ingest {}: {e}", envelope.event_type);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::Transactor;
    use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
    use prometheus::Registry;
    use repository::PgOrderEventsRepository;
    use serde_json::json;
    use service::AnalyticsMetrics;
    use tokio_postgres::NoTls;
    use uuid::Uuid;

    fn handler_without_db() -> AnalyticsIngestHandler {
        let mgr = Manager::from_config(
            tokio_postgres::Config::new(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr).max_size(1).build().unwrap();
        let metrics = AnalyticsMetrics::new(&Registry::new()).unwrap();
        let service = AnalyticsService::new(
            Transactor::new(pool),
            PgOrderEventsRepository::new(),
            metrics,
        );
        AnalyticsIngestHandler::new(Arc::new(service))
    }

    #[tokio::test]
    async fn malformed_envelope_is_acknowledged() {
        let handler = handler_without_db();
        assert!(handler.handle(b"", b"...").await.is_ok());
    }

    #[tokio::test]
    async fn malformed_payload_is_acknowledged() {
        let handler = handler_without_db();
        let env = Envelope::wrap("order.created", json!({"orderId": 7}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert!(handler.handle(b"order.created", &raw).await.is_ok());
    }

    #[tokio::test]
    async fn uncaptured_event_type_is_acknowledged() {
        let handler = handler_without_db();
        let env = Envelope::wrap("order.prepared", json!({"orderId": Uuid::new_v4()}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert!(handler.handle(b"order.prepared", &raw).await.is_ok());
    }
}
