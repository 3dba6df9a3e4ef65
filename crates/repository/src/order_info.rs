//! Order-info repository: the payment service's `order_cache` table.
//!
//! Rows are written when an `order.created` event arrives and expire 30
//! minutes later; an order is payable only while its row is unexpired.

use chrono::{Duration, Utc};
use model::OrderInfo;
use tokio_postgres::GenericClient;
use uuid::Uuid;

use crate::RepositoryError;

/// How long an order stays payable after its creation event was observed.
const PAYMENT_WINDOW_MINUTES: i64 = 30;

/// PostgreSQL repository for the payment eligibility window.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgOrderInfoRepository;

impl PgOrderInfoRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts the order info; a duplicate order id refreshes the expiry.
    pub async fn save<C: GenericClient>(
        &self,
        db: &C,
        info: &OrderInfo,
    ) -> Result<(), RepositoryError> {
        let expires_at = Utc::now() + Duration::minutes(PAYMENT_WINDOW_MINUTES);
        db.execute(
            r#"
            INSERT INTO order_cache (order_id, user_id, total_price, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
            &[
                &info.order_id,
                &info.user_id,
                &info.total_price,
                &info.created_at,
                &expires_at,
            ],
        )
        .await?;
        Ok(())
    }

    /// Loads the order info if the payment window is still open.
    ///
    /// An expired row behaves exactly like a missing one.
    pub async fn get_by_order_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<OrderInfo, RepositoryError> {
        let row = db
            .query_opt(
                r#"
                SELECT order_id, user_id, total_price, created_at
                FROM order_cache
                WHERE order_id = $1 AND expires_at > now()
                "#,
                &[&order_id],
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok(OrderInfo {
            order_id: row.get("order_id"),
            user_id: row.get("user_id"),
            total_price: row.get("total_price"),
            created_at: row.get("created_at"),
        })
    }

    /// Removes the row once the payment has been processed.
    pub async fn delete<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<(), RepositoryError> {
        db.execute("DELETE FROM order_cache WHERE order_id = $1", &[&order_id])
            .await?;
        Ok(())
    }
}
