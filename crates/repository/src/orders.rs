//! Order repository: the `orders` and `order_item` tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use model::{NewOrder, Order, OrderItem, OrderStatus, OrderStatusName};
use tokio_postgres::{GenericClient, Row};
use tracing::debug;
use uuid::Uuid;

use crate::RepositoryError;

const ORDER_COLUMNS: &str = "o.id, o.customer_id, o.status_id, s.name AS status_name, \
     o.total_amount, o.currency, o.payment_id, o.delivery_id, o.created_at, o.updated_at";

/// PostgreSQL repository for the order aggregate.
///
/// Stateless: every call runs against the executor handed in, which is how
/// mutations enlist in the caller's transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgOrdersRepository;

impl PgOrdersRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts the order and its items, status `created`.
    ///
    /// Returns the order hydrated with all server-assigned fields.
    pub async fn create<C: GenericClient>(
        &self,
        db: &C,
        new_order: &NewOrder,
    ) -> Result<Order, RepositoryError> {
        let row = db
            .query_one(
                r#"
                INSERT INTO orders (customer_id, total_amount, currency, status_id)
                VALUES ($1, $2, $3, (SELECT id FROM order_status WHERE name = 'created'))
                RETURNING id, status_id, created_at, updated_at
                "#,
                &[
                    &new_order.customer_id,
                    &new_order.total_amount,
                    &new_order.currency,
                ],
            )
            .await?;

        let order_id: Uuid = row.get("id");
        let status = OrderStatus {
            id: row.get("status_id"),
            name: OrderStatusName::Created,
        };
        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        let mut items = Vec::with_capacity(new_order.items.len());
        for item in &new_order.items {
            let item_row = db
                .query_one(
                    r#"
                    INSERT INTO order_item
                        (order_id, product_id, product_name, product_price, amount, total_price, notes)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING id
                    "#,
                    &[
                        &order_id,
                        &item.product_id,
                        &item.product_name,
                        &item.product_price,
                        &item.amount,
                        &item.total_price,
                        &item.notes,
                    ],
                )
                .await?;
            items.push(OrderItem {
                id: item_row.get("id"),
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                product_price: item.product_price,
                amount: item.amount,
                total_price: item.total_price,
                notes: item.notes.clone(),
            });
        }

        debug!("created order {order_id} with {} items", items.len());

        Ok(Order {
            id: order_id,
            customer_id: new_order.customer_id,
            status,
            total_amount: new_order.total_amount,
            currency: new_order.currency.clone(),
            payment_id: None,
            delivery_id: None,
            created_at,
            updated_at,
            items,
        })
    }

    /// Loads an order with its items.
    pub async fn get_by_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Order, RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             JOIN order_status s ON s.id = o.status_id WHERE o.id = $1"
        );
        let row = db
            .query_opt(&query, &[&order_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let mut order = row_to_order(&row)?;
        order.items = self.items_for(db, &[order_id]).await?.remove(&order_id).unwrap_or_default();
        Ok(order)
    }

    /// Loads an order without items and takes a row lock on it, serializing
    /// concurrent transitions of the same aggregate.
    pub async fn get_for_update<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Order, RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             JOIN order_status s ON s.id = o.status_id WHERE o.id = $1 FOR UPDATE OF o"
        );
        let row = db
            .query_opt(&query, &[&order_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        row_to_order(&row)
    }

    /// Moves the order to `status`, stamping `updated_at`.
    ///
    /// Legality of the transition is the service's concern; this only writes.
    pub async fn update_status<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
        status: OrderStatusName,
    ) -> Result<(OrderStatus, DateTime<Utc>), RepositoryError> {
        let row = db
            .query_opt(
                r#"
                UPDATE orders
                SET status_id = (SELECT id FROM order_status WHERE name = $2),
                    updated_at = now()
                WHERE id = $1
                RETURNING status_id, updated_at
                "#,
                &[&order_id, &status.as_str()],
            )
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok((
            OrderStatus {
                id: row.get("status_id"),
                name: status,
            },
            row.get("updated_at"),
        ))
    }

    /// Stamps the payment that settled the order.
    pub async fn set_payment_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
        payment_id: Uuid,
    ) -> Result<(), RepositoryError> {
        db.execute(
            "UPDATE orders SET payment_id = $2, updated_at = now() WHERE id = $1",
            &[&order_id, &payment_id],
        )
        .await?;
        Ok(())
    }

    /// Stamps the delivery assigned to the order.
    pub async fn set_delivery_id<C: GenericClient>(
        &self,
        db: &C,
        order_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<(), RepositoryError> {
        db.execute(
            "UPDATE orders SET delivery_id = $2, updated_at = now() WHERE id = $1",
            &[&order_id, &delivery_id],
        )
        .await?;
        Ok(())
    }

    /// A page of all orders, newest first, with the total count.
    pub async fn list<C: GenericClient>(
        &self,
        db: &C,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             JOIN order_status s ON s.id = o.status_id \
             ORDER BY o.created_at DESC LIMIT $1 OFFSET $2"
        );
        let rows = db.query(&query, &[&limit, &offset]).await?;
        let orders = self.hydrate(db, rows).await?;

        let total: i64 = db
            .query_one("SELECT COUNT(*) FROM orders", &[])
            .await?
            .get(0);

        Ok((orders, total))
    }

    /// A page of one user's orders, newest first, with the total count.
    pub async fn list_by_user<C: GenericClient>(
        &self,
        db: &C,
        customer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             JOIN order_status s ON s.id = o.status_id \
             WHERE o.customer_id = $1 \
             ORDER BY o.created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = db.query(&query, &[&customer_id, &limit, &offset]).await?;
        let orders = self.hydrate(db, rows).await?;

        let total: i64 = db
            .query_one(
                "SELECT COUNT(*) FROM orders WHERE customer_id = $1",
                &[&customer_id],
            )
            .await?
            .get(0);

        Ok((orders, total))
    }

    /// All orders of a user still inside the lifecycle (non-terminal status).
    pub async fn active_by_user<C: GenericClient>(
        &self,
        db: &C,
        customer_id: Uuid,
    ) -> Result<Vec<Order>, RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             JOIN order_status s ON s.id = o.status_id \
             WHERE o.customer_id = $1 AND s.name NOT IN ('completed', 'cancelled') \
             ORDER BY o.created_at DESC"
        );
        let rows = db.query(&query, &[&customer_id]).await?;
        self.hydrate(db, rows).await
    }

    /// Maps order rows and attaches their items with one batched query.
    async fn hydrate<C: GenericClient>(
        &self,
        db: &C,
        rows: Vec<Row>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders = rows
            .iter()
            .map(row_to_order)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.items_for(db, &ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn items_for<C: GenericClient>(
        &self,
        db: &C,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<OrderItem>>, RepositoryError> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = db
            .query(
                r#"
                SELECT id, order_id, product_id, product_name, product_price,
                       amount, total_price, notes
                FROM order_item
                WHERE order_id = ANY($1)
                "#,
                &[&order_ids],
            )
            .await?;

        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.get("order_id");
            by_order.entry(order_id).or_default().push(OrderItem {
                id: row.get("id"),
                product_id: row.get("product_id"),
                product_name: row.get("product_name"),
                product_price: row.get("product_price"),
                amount: row.get("amount"),
                total_price: row.get("total_price"),
                notes: row.get("notes"),
            });
        }
        Ok(by_order)
    }
}

fn row_to_order(row: &Row) -> Result<Order, RepositoryError> {
    let status_name: String = row.get("status_name");
    let name = OrderStatusName::parse(&status_name)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status '{status_name}'")))?;

    Ok(Order {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        status: OrderStatus {
            id: row.get("status_id"),
            name,
        },
        total_amount: row.get("total_amount"),
        currency: row.get("currency"),
        payment_id: row.get("payment_id"),
        delivery_id: row.get("delivery_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        items: Vec::new(),
    })
}
