//! Analytics repository: the `order_events` table and its aggregations.

use chrono::{DateTime, Utc};
use model::{OrderEvent, OrderStats};
use tokio_postgres::GenericClient;
use tracing::debug;
use uuid::Uuid;

use crate::RepositoryError;

/// PostgreSQL repository for ingested order events.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgOrderEventsRepository;

impl PgOrderEventsRepository {
    pub fn new() -> Self {
        Self
    }

    /// Persists one event row.
    ///
    /// `event_id` is unique-constrained; a duplicate insert is swallowed and
    /// reported as success. This is the idempotency contract that makes
    /// at-least-once delivery safe to ingest.
    pub async fn save<C: GenericClient>(
        &self,
        db: &C,
        event: &OrderEvent,
    ) -> Result<(), RepositoryError> {
        let result = db
            .execute(
                r#"
                INSERT INTO order_events
                    (id, event_id, event_type, order_id, user_id, amount,
                     payment_id, reason, occurred_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                "#,
                &[
                    &event.id,
                    &event.event_id,
                    &event.event_type,
                    &event.order_id,
                    &event.user_id,
                    &event.amount,
                    &event.payment_id,
                    &event.reason,
                    &event.occurred_at,
                ],
            )
            .await;

        match result.map_err(RepositoryError::from) {
            Ok(_) => Ok(()),
            Err(RepositoryError::AlreadyExists) => {
                debug!("order event {} already ingested", event.event_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// All events of one order, in occurrence order.
    pub async fn get_by_order_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Vec<OrderEvent>, RepositoryError> {
        let rows = db
            .query(
                r#"
                SELECT id, event_id, event_type, order_id, user_id, amount,
                       payment_id, reason, occurred_at, created_at
                FROM order_events
                WHERE order_id = $1
                ORDER BY occurred_at ASC
                "#,
                &[&order_id],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderEvent {
                id: row.get("id"),
                event_id: row.get("event_id"),
                event_type: row.get("event_type"),
                order_id: row.get("order_id"),
                user_id: row.get("user_id"),
                amount: row.get("amount"),
                payment_id: row.get("payment_id"),
                reason: row.get("reason"),
                occurred_at: row.get("occurred_at"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Per-day, per-event-type aggregates over `[start, end)`.
    pub async fn stats_by_date_range<C: GenericClient>(
        &self,
        db: &C,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OrderStats>, RepositoryError> {
        let rows = db
            .query(
                r#"
                SELECT
                    DATE_TRUNC('day', occurred_at) AS date,
                    event_type,
                    COUNT(*) AS count,
                    COUNT(DISTINCT order_id) AS unique_orders,
                    COUNT(DISTINCT user_id) AS unique_users,
                    SUM(amount) AS total_amount
                FROM order_events
                WHERE occurred_at >= $1 AND occurred_at < $2
                GROUP BY DATE_TRUNC('day', occurred_at), event_type
                ORDER BY date DESC, event_type
                "#,
                &[&start, &end],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderStats {
                date: row.get("date"),
                event_type: row.get("event_type"),
                count: row.get("count"),
                unique_orders: row.get("unique_orders"),
                unique_users: row.get("unique_users"),
                total_amount: row.get("total_amount"),
            })
            .collect())
    }

    /// Revenue over `[start, end)`: the sum of `order.created` amounts.
    pub async fn total_revenue<C: GenericClient>(
        &self,
        db: &C,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, RepositoryError> {
        let row = db
            .query_one(
                r#"
                SELECT COALESCE(SUM(amount), 0)::double precision AS revenue
                FROM order_events
                WHERE event_type = 'order.created'
                  AND occurred_at >= $1 AND occurred_at < $2
                  AND amount IS NOT NULL
                "#,
                &[&start, &end],
            )
            .await?;
        Ok(row.get("revenue"))
    }
}
