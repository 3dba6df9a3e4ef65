//! Payment repository: the `payments` table.

use chrono::{DateTime, Utc};
use model::{Payment, PaymentStatus, PaymentStatusName};
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::RepositoryError;

const PAYMENT_COLUMNS: &str = "p.id, p.order_id, p.amount, p.currency, \
     p.status_id, s.name AS status_name, p.failure_reason, p.created_at, p.updated_at";

/// PostgreSQL repository for the payment aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgPaymentsRepository;

impl PgPaymentsRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts a payment attempt in the given status.
    pub async fn create<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
        amount: f64,
        currency: &str,
        status: PaymentStatusName,
    ) -> Result<Payment, RepositoryError> {
        let row = db
            .query_one(
                r#"
                INSERT INTO payments (order_id, amount, currency, status_id)
                VALUES ($1, $2, $3, (SELECT id FROM payment_status WHERE name = $4))
                RETURNING id, status_id, created_at, updated_at
                "#,
                &[&order_id, &amount, &currency, &status.as_str()],
            )
            .await?;

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        Ok(Payment {
            id: row.get("id"),
            order_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus {
                id: row.get("status_id"),
                name: status,
            },
            failure_reason: None,
            created_at,
            updated_at,
        })
    }

    /// Flips the payment status, optionally recording why the gateway
    /// declined.
    ///
    /// At most one payment per order may reach `completed`; the partial
    /// unique index on the table rejects a second one as `AlreadyExists`.
    pub async fn update_status<C: GenericClient>(
        &self,
        db: &C,
        payment_id: Uuid,
        status: PaymentStatusName,
        failure_reason: Option<&str>,
    ) -> Result<(PaymentStatus, DateTime<Utc>), RepositoryError> {
        let row = db
            .query_opt(
                r#"
                UPDATE payments
                SET status_id = (SELECT id FROM payment_status WHERE name = $2),
                    failure_reason = COALESCE($3, failure_reason),
                    updated_at = now()
                WHERE id = $1
                RETURNING status_id, updated_at
                "#,
                &[&payment_id, &status.as_str(), &failure_reason],
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok((
            PaymentStatus {
                id: row.get("status_id"),
                name: status,
            },
            row.get("updated_at"),
        ))
    }

    pub async fn get_by_id<C: GenericClient>(
        &self,
        db: &C,
        payment_id: Uuid,
    ) -> Result<Payment, RepositoryError> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p \
             JOIN payment_status s ON s.id = p.status_id WHERE p.id = $1"
        );
        let row = db
            .query_opt(&query, &[&payment_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        row_to_payment(&row)
    }

    /// The latest payment attempt for an order.
    pub async fn get_by_order_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Payment, RepositoryError> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p \
             JOIN payment_status s ON s.id = p.status_id \
             WHERE p.order_id = $1 ORDER BY p.created_at DESC LIMIT 1"
        );
        let row = db
            .query_opt(&query, &[&order_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        row_to_payment(&row)
    }

    /// A page of payments, newest first, optionally filtered by status.
    pub async fn list<C: GenericClient>(
        &self,
        db: &C,
        limit: i64,
        offset: i64,
        status: Option<PaymentStatusName>,
    ) -> Result<(Vec<Payment>, i64), RepositoryError> {
        let status_name = status.map(|s| s.as_str());
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p \
             JOIN payment_status s ON s.id = p.status_id \
             WHERE $3::text IS NULL OR s.name = $3 \
             ORDER BY p.created_at DESC LIMIT $1 OFFSET $2"
        );
        let rows = db.query(&query, &[&limit, &offset, &status_name]).await?;
        let payments = rows
            .iter()
            .map(row_to_payment)
            .collect::<Result<Vec<_>, _>>()?;

        let total: i64 = db
            .query_one(
                "SELECT COUNT(*) FROM payments p \
                 JOIN payment_status s ON s.id = p.status_id \
                 WHERE $1::text IS NULL OR s.name = $1",
                &[&status_name],
            )
            .await?
            .get(0);

        Ok((payments, total))
    }
}

fn row_to_payment(row: &Row) -> Result<Payment, RepositoryError> {
    let status_name: String = row.get("status_name");
    let name = PaymentStatusName::parse(&status_name).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown payment status '{status_name}'"))
    })?;

    Ok(Payment {
        id: row.get("id"),
        order_id: row.get("order_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: PaymentStatus {
            id: row.get("status_id"),
            name,
        },
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
