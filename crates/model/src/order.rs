//! Order aggregate and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an order.
///
/// The full transition graph is:
/// `created -> {paid, cancelled}`, `paid -> {preparing, cancelled}`,
/// `preparing -> {prepared, cancelled}`, `prepared -> {delivering, cancelled}`,
/// `delivering -> {completed, cancelled}`. `completed` and `cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusName {
    Created,
    Paid,
    Preparing,
    Prepared,
    Delivering,
    Completed,
    Cancelled,
}

impl OrderStatusName {
    /// The status name as stored in the `order_status` lookup table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatusName::Created => "created",
            OrderStatusName::Paid => "paid",
            OrderStatusName::Preparing => "preparing",
            OrderStatusName::Prepared => "prepared",
            OrderStatusName::Delivering => "delivering",
            OrderStatusName::Completed => "completed",
            OrderStatusName::Cancelled => "cancelled",
        }
    }

    /// Parses a status name coming from the database or an API parameter.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderStatusName::Created),
            "paid" => Some(OrderStatusName::Paid),
            "preparing" => Some(OrderStatusName::Preparing),
            "prepared" => Some(OrderStatusName::Prepared),
            "delivering" => Some(OrderStatusName::Delivering),
            "completed" => Some(OrderStatusName::Completed),
            "cancelled" => Some(OrderStatusName::Cancelled),
            _ => None,
        }
    }

    /// Whether the status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatusName::Completed | OrderStatusName::Cancelled
        )
    }

    /// The transition table: destinations reachable from this status.
    pub fn allowed_transitions(&self) -> &'static [OrderStatusName] {
        use OrderStatusName::*;
        match self {
            Created => &[Paid, Cancelled],
            Paid => &[Preparing, Cancelled],
            Preparing => &[Prepared, Cancelled],
            Prepared => &[Delivering, Cancelled],
            Delivering => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: OrderStatusName) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl std::fmt::Display for OrderStatusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as exposed over HTTP: the lookup-table id plus the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub id: i32,
    pub name: OrderStatusName,
}

/// A single position of an order.
///
/// Product name and price are snapshotted at creation time so historical
/// orders stay stable when the product catalog changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_price: f64,
    /// Quantity ordered, at least 1.
    pub amount: i32,
    /// Always `product_price * amount`; also checked by the database.
    pub total_price: f64,
    pub notes: String,
}

/// Order - the main aggregate of the order service.
///
/// Owned exclusively by the order state machine: created by the HTTP create
/// command and mutated only through lifecycle transitions. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// Input for the create-order command, before server-assigned ids exist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub total_amount: f64,
    pub currency: String,
    pub items: Vec<NewOrderItem>,
}

/// A position of a not-yet-persisted order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_price: f64,
    pub amount: i32,
    pub total_price: f64,
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::OrderStatusName::*;

    #[test]
    fn happy_path_is_reachable() {
        let path = [Created, Paid, Preparing, Prepared, Delivering, Completed];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} must be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn every_non_terminal_status_can_cancel() {
        for status in [Created, Paid, Preparing, Prepared, Delivering] {
            assert!(status.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_statuses_have_no_transitions() {
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Completed.allowed_transitions().is_empty());
        assert!(Cancelled.allowed_transitions().is_empty());
    }

    #[test]
    fn skipping_stages_is_forbidden() {
        assert!(!Created.can_transition_to(Preparing));
        assert!(!Created.can_transition_to(Completed));
        assert!(!Paid.can_transition_to(Delivering));
        assert!(!Cancelled.can_transition_to(Created));
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            Created, Paid, Preparing, Prepared, Delivering, Completed, Cancelled,
        ] {
            assert_eq!(super::OrderStatusName::parse(status.as_str()), Some(status));
        }
        assert_eq!(super::OrderStatusName::parse("shipped"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Created).unwrap();
        assert_eq!(json, "\"created\"");
    }

    #[test]
    fn order_serializes_with_camel_case_and_status_object() {
        let order = super::Order {
            id: uuid::Uuid::new_v4(),
            customer_id: uuid::Uuid::new_v4(),
            status: super::OrderStatus {
                id: 1,
                name: Created,
            },
            total_amount: 150.0,
            currency: "USD".into(),
            payment_id: None,
            delivery_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            items: vec![super::OrderItem {
                id: uuid::Uuid::new_v4(),
                product_id: uuid::Uuid::new_v4(),
                product_name: "Pizza".into(),
                product_price: 50.0,
                amount: 2,
                total_price: 100.0,
                notes: String::new(),
            }],
        };

        let raw = serde_json::to_value(&order).unwrap();
        assert_eq!(raw["status"]["name"], "created");
        assert_eq!(raw["totalAmount"], 150.0);
        assert_eq!(raw["items"][0]["productPrice"], 50.0);
        assert_eq!(raw["items"][0]["totalPrice"], 100.0);
        // Unset optional ids stay off the wire.
        assert!(raw.get("paymentId").is_none());
        assert!(raw.get("deliveryId").is_none());
    }
}
