//! Analytics ingester and the derived queries over the events table.
//!
//! Ingestion is idempotent by envelope id: replaying a message leaves exactly
//! one row. Payloads are normalized per event type; unknown types are skipped
//! so the consumer can acknowledge them.

use chrono::{DateTime, Utc};
use db::Transactor;
use model::{Envelope, EventDecodeError, OrderEvent, OrderStats};
use prometheus::{HistogramVec, IntCounterVec, Registry};
use repository::{PgOrderEventsRepository, RepositoryError};
use serde::Deserialize;
use thiserror::Error;
use tokio_postgres::Client;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Errors surfaced by the analytics service.
#[derive(Debug, Error)]
pub enum AnalyticsServiceError {
    /// The envelope payload did not match its event type.
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(#[from] RepositoryError),
    /// Failed to obtain a database connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

/// Prometheus metrics of the ingestion pipeline.
pub struct AnalyticsMetrics {
    order_events_total: IntCounterVec,
    order_amount: HistogramVec,
}

impl AnalyticsMetrics {
    /// Creates the metric family and registers it with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let order_events_total = IntCounterVec::new(
            prometheus::Opts::new("order_events_total", "Total number of order events"),
            &["event_type"],
        )?;
        let order_amount = HistogramVec::new(
            prometheus::HistogramOpts::new("order_amount", "Order amounts")
                .buckets(prometheus::exponential_buckets(100.0, 2.0, 10)?),
            &["event_type"],
        )?;

        registry.register(Box::new(order_events_total.clone()))?;
        registry.register(Box::new(order_amount.clone()))?;

        Ok(Self {
            order_events_total,
            order_amount,
        })
    }

    fn record(&self, event: &OrderEvent) {
        self.order_events_total
            .with_label_values(&[&event.event_type])
            .inc();
        if let Some(amount) = event.amount {
            self.order_amount
                .with_label_values(&[&event.event_type])
                .observe(amount);
        }
    }
}

/// The analytics capture service.
pub struct AnalyticsService {
    transactor: Transactor,
    events: PgOrderEventsRepository,
    metrics: AnalyticsMetrics,
}

impl AnalyticsService {
    pub fn new(
        transactor: Transactor,
        events: PgOrderEventsRepository,
        metrics: AnalyticsMetrics,
    ) -> Self {
        Self {
            transactor,
            events,
            metrics,
        }
    }

    /// Ingests one envelope from the order events topic.
    ///
    /// Returns `Ok(false)` when the event type is not captured. Replaying an
    /// already-ingested envelope succeeds without a second row.
    #[instrument(skip(self, envelope), fields(event_type = %envelope.event_type))]
    pub async fn record_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<bool, AnalyticsServiceError> {
        let Some(event) = normalize_envelope(envelope)? else {
            debug!("skipping event type {}", envelope.event_type);
            return Ok(false);
        };

        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        self.events.save(client, &event).await?;

        self.metrics.record(&event);
        info!(
            "ingested {} for order {}",
            event.event_type, event.order_id
        );
        Ok(true)
    }

    /// All events of one order, in occurrence order.
    pub async fn get_order_events(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderEvent>, AnalyticsServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.events.get_by_order_id(client, order_id).await?)
    }

    /// Per-day, per-event-type statistics over `[start, end)`.
    pub async fn get_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OrderStats>, AnalyticsServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.events.stats_by_date_range(client, start, end).await?)
    }

    /// Revenue (sum of `order.created` amounts) over `[start, end)`.
    pub async fn get_revenue(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, AnalyticsServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.events.total_revenue(client, start, end).await?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedData {
    order_id: Uuid,
    user_id: Uuid,
    total_price: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaidData {
    order_id: Uuid,
    payment_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledData {
    order_id: Uuid,
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedData {
    order_id: Uuid,
}

/// Normalizes an envelope into an event row, or `None` for types the
/// analytics side does not capture.
fn normalize_envelope(env: &Envelope) -> Result<Option<OrderEvent>, EventDecodeError> {
    let payload_err = |e| EventDecodeError::Payload {
        event_type: env.event_type.clone(),
        source: e,
    };

    let mut event = OrderEvent {
        id: Uuid::new_v4(),
        event_id: env.event_id,
        event_type: env.event_type.clone(),
        order_id: Uuid::nil(),
        user_id: None,
        amount: None,
        payment_id: None,
        reason: None,
        occurred_at: env.occurred_at,
        created_at: Utc::now(),
    };

    match env.event_type.as_str() {
        "order.created" => {
            let d: CreatedData = serde_json::from_value(env.data.clone()).map_err(payload_err)?;
            event.order_id = d.order_id;
            event.user_id = Some(d.user_id);
            event.amount = Some(d.total_price);
        }
        "order.paid" => {
            let d: PaidData = serde_json::from_value(env.data.clone()).map_err(payload_err)?;
            event.order_id = d.order_id;
            event.payment_id = Some(d.payment_id);
        }
        "order.cancelled" => {
            let d: CancelledData = serde_json::from_value(env.data.clone()).map_err(payload_err)?;
            event.order_id = d.order_id;
            event.reason = Some(d.reason);
        }
        "order.completed" => {
            let d: CompletedData = serde_json::from_value(env.data.clone()).map_err(payload_err)?;
            event.order_id = d.order_id;
        }
        _ => return Ok(None),
    }

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_event_captures_user_and_amount() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let env = Envelope::wrap(
            "order.created",
            json!({"orderId": order_id, "userId": user_id, "totalPrice": 150.0}),
        );

        let event = normalize_envelope(&env).unwrap().unwrap();
        assert_eq!(event.event_id, env.event_id);
        assert_eq!(event.event_type, "order.created");
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.amount, Some(150.0));
        assert_eq!(event.payment_id, None);
        assert_eq!(event.occurred_at, env.occurred_at);
    }

    #[test]
    fn paid_event_captures_payment_id_only() {
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let env = Envelope::wrap(
            "order.paid",
            json!({"orderId": order_id, "paymentId": payment_id}),
        );

        let event = normalize_envelope(&env).unwrap().unwrap();
        assert_eq!(event.payment_id, Some(payment_id));
        assert_eq!(event.user_id, None);
        assert_eq!(event.amount, None);
    }

    #[test]
    fn cancelled_event_captures_reason() {
        let env = Envelope::wrap(
            "order.cancelled",
            json!({"orderId": Uuid::new_v4(), "reason": "insufficient funds"}),
        );

        let event = normalize_envelope(&env).unwrap().unwrap();
        assert_eq!(event.reason.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn completed_event_carries_order_id_only() {
        let order_id = Uuid::new_v4();
        let env = Envelope::wrap("order.completed", json!({"orderId": order_id}));

        let event = normalize_envelope(&env).unwrap().unwrap();
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.user_id, None);
        assert_eq!(event.amount, None);
        assert_eq!(event.payment_id, None);
        assert_eq!(event.reason, None);
    }

    #[test]
    fn uncaptured_event_types_are_skipped() {
        let env = Envelope::wrap("order.prepared", json!({"orderId": Uuid::new_v4()}));
        assert!(normalize_envelope(&env).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let env = Envelope::wrap("order.created", json!({"orderId": 42}));
        assert!(normalize_envelope(&env).is_err());
    }
}
