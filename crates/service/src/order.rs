//! Order state machine: the single authoritative owner of order status.
//!
//! Commands arrive from HTTP handlers, reactions arrive from bus consumers;
//! both funnel into one transition path that consults the lifecycle table,
//! writes the status change and the matching outbox record in one
//! transaction, and refuses everything outside the graph.

use db::Transactor;
use model::{DomainEvent, NewOrder, Order, OrderStatusName};
use repository::{PgOrdersRepository, PgOutboxRepository, RepositoryError};
use thiserror::Error;
use tokio_postgres::Client;
use tracing::{info, instrument};
use uuid::Uuid;

/// Tolerance for validating `total_price = product_price * amount`.
const PRICE_EPSILON: f64 = 1e-9;

/// Errors surfaced by the order service.
#[derive(Debug, Error)]
pub enum OrderServiceError {
    /// The submitted order is structurally or semantically invalid.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    /// No order with the requested id.
    #[error("Order not found")]
    NotFound,
    /// The database rejected the insert as a duplicate.
    #[error("Order already exists")]
    AlreadyExists,
    /// The requested edge is not in the lifecycle graph.
    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition {
        from: OrderStatusName,
        to: OrderStatusName,
    },
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(RepositoryError),
    /// Failed to obtain a database connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// Opening or committing the transaction failed.
    #[error("Transaction error: {0}")]
    Tx(tokio_postgres::Error),
}

impl From<RepositoryError> for OrderServiceError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => OrderServiceError::NotFound,
            RepositoryError::AlreadyExists => OrderServiceError::AlreadyExists,
            RepositoryError::Pool(e) => OrderServiceError::Pool(e),
            other => OrderServiceError::Db(other),
        }
    }
}

impl OrderServiceError {
    /// Whether retrying the operation cannot succeed (the consumer layer
    /// acknowledges such failures instead of redelivering).
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OrderServiceError::InvalidOrder(_)
                | OrderServiceError::NotFound
                | OrderServiceError::AlreadyExists
                | OrderServiceError::IllegalTransition { .. }
        )
    }
}

/// Extra column stamped alongside a status transition.
enum Stamp {
    None,
    Payment(Uuid),
    Delivery(Uuid),
}

/// The order lifecycle service.
pub struct OrderService {
    transactor: Transactor,
    orders: PgOrdersRepository,
    outbox: PgOutboxRepository,
}

impl OrderService {
    pub fn new(
        transactor: Transactor,
        orders: PgOrdersRepository,
        outbox: PgOutboxRepository,
    ) -> Self {
        Self {
            transactor,
            orders,
            outbox,
        }
    }

    /// Creates an order in status `created`.
    ///
    /// The order row, its items and an `order.created` outbox record commit
    /// atomically. Returns the order with all server-assigned fields.
    #[instrument(skip(self, new_order))]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<Order, OrderServiceError> {
        validate_new_order(&new_order)?;

        let mut conn = self.transactor.conn().await?;
        let tx = Client::transaction(&mut conn).await.map_err(OrderServiceError::Tx)?;

        let order = self.orders.create(&tx, &new_order).await?;
        self.outbox
            .create(
                &tx,
                &DomainEvent::OrderCreated {
                    order_id: order.id,
                    user_id: order.customer_id,
                    total_price: order.total_amount,
                },
            )
            .await?;

        tx.commit().await.map_err(OrderServiceError::Tx)?;

        info!("order {} created for customer {}", order.id, order.customer_id);
        Ok(order)
    }

    /// `created -> paid`: stamps the settling payment, emits `order.paid`.
    #[instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Order, OrderServiceError> {
        self.transition(
            order_id,
            OrderStatusName::Paid,
            Stamp::Payment(payment_id),
            Some(DomainEvent::OrderPaid {
                order_id,
                payment_id,
            }),
        )
        .await
    }

    /// `preparing -> prepared`, emits `order.prepared`.
    #[instrument(skip(self))]
    pub async fn mark_ready(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        self.transition(
            order_id,
            OrderStatusName::Prepared,
            Stamp::None,
            Some(DomainEvent::OrderPrepared { order_id }),
        )
        .await
    }

    /// `prepared -> delivering`: stamps the delivery, emits `order.delivering`.
    #[instrument(skip(self))]
    pub async fn mark_delivering(
        &self,
        order_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<Order, OrderServiceError> {
        self.transition(
            order_id,
            OrderStatusName::Delivering,
            Stamp::Delivery(delivery_id),
            Some(DomainEvent::OrderDelivering {
                order_id,
                delivery_id,
            }),
        )
        .await
    }

    /// `delivering -> completed`, emits `order.completed`.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        self.transition(
            order_id,
            OrderStatusName::Completed,
            Stamp::None,
            Some(DomainEvent::OrderCompleted { order_id }),
        )
        .await
    }

    /// Cancels the order from any non-terminal status, emitting
    /// `order.cancelled` with the given reason.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Order, OrderServiceError> {
        self.transition(
            order_id,
            OrderStatusName::Cancelled,
            Stamp::None,
            Some(DomainEvent::OrderCancelled {
                order_id,
                reason: reason.to_string(),
            }),
        )
        .await
    }

    /// Applies an arbitrary named transition if the current -> target edge is
    /// in the lifecycle graph.
    ///
    /// Transitions whose events need data beyond the order id (`paid`,
    /// `delivering`) come through their dedicated commands; through here they
    /// change state without emitting.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        target: OrderStatusName,
    ) -> Result<Order, OrderServiceError> {
        self.transition(order_id, target, Stamp::None, event_for_update(order_id, target))
            .await
    }

    /// Loads a hydrated order.
    pub async fn get_by_id(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.orders.get_by_id(client, order_id).await?)
    }

    /// A page of all orders plus the total count.
    pub async fn get_all(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), OrderServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.orders.list(client, limit, offset).await?)
    }

    /// A page of one user's orders plus the total count.
    pub async fn get_by_user(
        &self,
        customer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Order>, i64), OrderServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self
            .orders
            .list_by_user(client, customer_id, limit, offset)
            .await?)
    }

    /// All of a user's orders still inside the lifecycle.
    pub async fn get_active_by_user(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Order>, OrderServiceError> {
        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        Ok(self.orders.active_by_user(client, customer_id).await?)
    }

    /// The single transition path.
    ///
    /// Locks the order row, consults the lifecycle table, then commits the
    /// status change, the stamped column and the outbox record together. A
    /// transition to the current status is a no-op: nothing is written and
    /// nothing is emitted.
    async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatusName,
        stamp: Stamp,
        event: Option<DomainEvent>,
    ) -> Result<Order, OrderServiceError> {
        let mut conn = self.transactor.conn().await?;
        let tx = Client::transaction(&mut conn).await.map_err(OrderServiceError::Tx)?;

        let mut order = self.orders.get_for_update(&tx, order_id).await?;

        if order.status.name == target {
            info!("order {order_id} already in status {target}, nothing to do");
            drop(tx);
            let client: &Client = &conn;
            return Ok(self.orders.get_by_id(client, order_id).await?);
        }

        if !order.status.name.can_transition_to(target) {
            return Err(OrderServiceError::IllegalTransition {
                from: order.status.name,
                to: target,
            });
        }

        match stamp {
            Stamp::Payment(payment_id) => {
                self.orders.set_payment_id(&tx, order_id, payment_id).await?;
                order.payment_id = Some(payment_id);
            }
            Stamp::Delivery(delivery_id) => {
                self.orders
                    .set_delivery_id(&tx, order_id, delivery_id)
                    .await?;
                order.delivery_id = Some(delivery_id);
            }
            Stamp::None => {}
        }

        let (status, updated_at) = self.orders.update_status(&tx, order_id, target).await?;

        if let Some(event) = &event {
            self.outbox.create(&tx, event).await?;
        }

        tx.commit().await.map_err(OrderServiceError::Tx)?;

        info!("order {order_id} moved to status {target}");

        order.status = status;
        order.updated_at = updated_at;

        let client: &Client = &conn;
        order.items = self
            .orders
            .get_by_id(client, order_id)
            .await
            .map(|o| o.items)
            .unwrap_or_default();
        Ok(order)
    }
}

/// Events emitted by the generic status-update command. Transitions whose
/// payloads need ids the command does not carry emit nothing here.
fn event_for_update(order_id: Uuid, target: OrderStatusName) -> Option<DomainEvent> {
    match target {
        OrderStatusName::Prepared => Some(DomainEvent::OrderPrepared { order_id }),
        OrderStatusName::Completed => Some(DomainEvent::OrderCompleted { order_id }),
        OrderStatusName::Cancelled => Some(DomainEvent::OrderCancelled {
            order_id,
            reason: "order cancelled".to_string(),
        }),
        _ => None,
    }
}

/// Validates the structure of a create command before anything is written.
fn validate_new_order(new_order: &NewOrder) -> Result<(), OrderServiceError> {
    if new_order.items.is_empty() {
        return Err(OrderServiceError::InvalidOrder("order has no items".into()));
    }
    if new_order.currency.is_empty() {
        return Err(OrderServiceError::InvalidOrder("currency is empty".into()));
    }
    if new_order.total_amount < 0.0 {
        return Err(OrderServiceError::InvalidOrder(
            "total amount is negative".into(),
        ));
    }

    for item in &new_order.items {
        if item.amount < 1 {
            return Err(OrderServiceError::InvalidOrder(format!(
                "item {} has non-positive amount",
                item.product_id
            )));
        }
        let expected = item.product_price * f64::from(item.amount);
        if (item.total_price - expected).abs() > PRICE_EPSILON {
            return Err(OrderServiceError::InvalidOrder(format!(
                "item {} total price {} does not match {} x {}",
                item.product_id, item.total_price, item.product_price, item.amount
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::NewOrderItem;

    fn item(price: f64, amount: i32, total: f64) -> NewOrderItem {
        NewOrderItem {
            product_id: Uuid::new_v4(),
            product_name: "Pizza".into(),
            product_price: price,
            amount,
            total_price: total,
            notes: String::new(),
        }
    }

    fn order_with(items: Vec<NewOrderItem>) -> NewOrder {
        NewOrder {
            customer_id: Uuid::new_v4(),
            total_amount: items.iter().map(|i| i.total_price).sum(),
            currency: "USD".into(),
            items,
        }
    }

    #[test]
    fn valid_order_passes() {
        let order = order_with(vec![item(50.0, 2, 100.0), item(5.0, 10, 50.0)]);
        assert!(validate_new_order(&order).is_ok());
    }

    #[test]
    fn order_without_items_is_rejected() {
        let order = order_with(vec![]);
        assert!(matches!(
            validate_new_order(&order),
            Err(OrderServiceError::InvalidOrder(_))
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let order = order_with(vec![item(50.0, 0, 0.0)]);
        assert!(matches!(
            validate_new_order(&order),
            Err(OrderServiceError::InvalidOrder(_))
        ));
    }

    #[test]
    fn mismatched_item_total_is_rejected() {
        let order = order_with(vec![item(50.0, 2, 99.0)]);
        assert!(matches!(
            validate_new_order(&order),
            Err(OrderServiceError::InvalidOrder(_))
        ));
    }

    #[test]
    fn empty_currency_is_rejected() {
        let mut order = order_with(vec![item(50.0, 2, 100.0)]);
        order.currency.clear();
        assert!(matches!(
            validate_new_order(&order),
            Err(OrderServiceError::InvalidOrder(_))
        ));
    }

    #[test]
    fn generic_update_emits_only_id_carrying_events() {
        let order_id = Uuid::new_v4();

        assert!(event_for_update(order_id, OrderStatusName::Preparing).is_none());
        assert!(event_for_update(order_id, OrderStatusName::Paid).is_none());

        let prepared = event_for_update(order_id, OrderStatusName::Prepared).unwrap();
        assert_eq!(prepared.event_type(), "order.prepared");

        let cancelled = event_for_update(order_id, OrderStatusName::Cancelled).unwrap();
        assert_eq!(cancelled.event_type(), "order.cancelled");
    }

    #[test]
    fn permanent_errors_are_classified_for_the_consumer_layer() {
        assert!(OrderServiceError::NotFound.is_permanent());
        assert!(OrderServiceError::AlreadyExists.is_permanent());
        assert!(OrderServiceError::InvalidOrder("bad".into()).is_permanent());
        assert!(OrderServiceError::IllegalTransition {
            from: OrderStatusName::Completed,
            to: OrderStatusName::Paid,
        }
        .is_permanent());
    }
}
