//! Outbox repository: writes records inside domain transactions and serves
//! the relay worker.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{DomainEvent, OutboxStatusName};
use outbox::{OutboxStore, PendingEvent};
use tokio_postgres::GenericClient;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::RepositoryError;

/// PostgreSQL repository for the `outbox` table.
///
/// The [`Self::create`] side takes an executor so the record commits together
/// with the domain mutation. The worker-facing [`OutboxStore`] side owns the
/// pool because the relay runs outside any request scope.
#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: Pool,
}

impl PgOutboxRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Inserts a pending outbox record for `event` within the caller's
    /// transaction.
    pub async fn create<C: GenericClient>(
        &self,
        db: &C,
        event: &DomainEvent,
    ) -> Result<Uuid, RepositoryError> {
        let row = db
            .query_one(
                r#"
                INSERT INTO outbox (aggregate_type, aggregate_id, event_type, payload, status_id)
                VALUES ($1, $2, $3, $4, (SELECT id FROM outbox_status WHERE name = $5))
                RETURNING id
                "#,
                &[
                    &event.aggregate_type(),
                    &event.aggregate_id(),
                    &event.event_type(),
                    &event.payload(),
                    &OutboxStatusName::Pending.as_str(),
                ],
            )
            .await?;

        let id: Uuid = row.get("id");
        debug!(
            "outbox record {id} created: aggregate={} type={}",
            event.aggregate_type(),
            event.event_type()
        );
        Ok(id)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxRepository {
    async fn fetch_pending(&self, limit: i64) -> anyhow::Result<Vec<PendingEvent>> {
        let mut conn = self.pool.get().await?;
        // The skip-lock keeps concurrent worker replicas off each other's
        // rows for the duration of the selection.
        let tx = conn.transaction().await?;
        let rows = tx
            .query(
                r#"
                SELECT o.id, o.event_type, o.payload
                FROM outbox o
                JOIN outbox_status s ON s.id = o.status_id
                WHERE s.name = $2
                ORDER BY o.created_at
                LIMIT $1
                FOR UPDATE OF o SKIP LOCKED
                "#,
                &[&limit, &OutboxStatusName::Pending.as_str()],
            )
            .await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|row| PendingEvent {
                id: row.get("id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
            })
            .collect())
    }

    async fn mark_processed(&self, ids: &[Uuid]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let conn = self.pool.get().await?;
        conn.execute(
            r#"
            UPDATE outbox
            SET status_id = (SELECT id FROM outbox_status WHERE name = $2),
                processed_at = now()
            WHERE id = ANY($1)
            "#,
            &[&ids, &OutboxStatusName::Processed.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        warn!("outbox record {id} failed: {error}");

        let conn = self.pool.get().await?;
        conn.execute(
            r#"
            UPDATE outbox
            SET status_id = (SELECT id FROM outbox_status WHERE name = $3),
                processed_at = now(),
                last_error = $2
            WHERE id = $1
            "#,
            &[&id, &error, &OutboxStatusName::Failed.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn requeue_failed(&self, limit: i64) -> anyhow::Result<u64> {
        let conn = self.pool.get().await?;
        let requeued = conn
            .execute(
                r#"
                UPDATE outbox
                SET status_id = (SELECT id FROM outbox_status WHERE name = $2),
                    processed_at = NULL
                WHERE id IN (
                    SELECT o.id
                    FROM outbox o
                    JOIN outbox_status s ON s.id = o.status_id
                    WHERE s.name = $3
                    ORDER BY o.created_at
                    LIMIT $1
                    FOR UPDATE OF o SKIP LOCKED
                )
                "#,
                &[
                    &limit,
                    &OutboxStatusName::Pending.as_str(),
                    &OutboxStatusName::Failed.as_str(),
                ],
            )
            .await?;
        Ok(requeued)
    }
}
