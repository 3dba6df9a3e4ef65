//! Order-side reactions to payment, kitchen and delivery events.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kafka_consumer::EventHandler;
use model::{IncomingEvent, OrderStatusName};
use service::{OrderService, OrderServiceError};
use tracing::{error, warn};

/// Decodes a raw message into an event the order machine reacts to.
///
/// Malformed envelopes and unknown types come back as `None`: there is
/// nothing to retry, the message must be acknowledged.
fn decode(payload: &[u8]) -> Option<IncomingEvent> {
    let envelope = match IncomingEvent::parse_envelope(payload) {
        Ok(env) => env,
        Err(e) => {
            error!("failed to parse envelope: {e}");
            return None;
        }
    };

    match IncomingEvent::decode(&envelope) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            warn!("ignoring event type {}", envelope.event_type);
            None
        }
        Err(e) => {
            error!("failed to parse payload: {e}");
            None
        }
    }
}

/// Folds a transition result into the commit decision: permanent failures are
/// logged and acknowledged, transient ones are surfaced for redelivery.
fn ack_or_retry<T>(result: Result<T, OrderServiceError>, context: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_permanent() => {
            warn!("{context}: {e}; acknowledging");
            Ok(())
        }
        Err(e) => {
            error!("{context}: {e}");
            Err(e.into())
        }
    }
}

/// Reacts to `payment.events`: settles or cancels the order.
pub struct PaymentEventsHandler {
    orders: Arc<OrderService>,
}

impl PaymentEventsHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl EventHandler for PaymentEventsHandler {
    async fn handle(&self, _key: &[u8], payload: &[u8]) -> Result<()> {
        let Some(event) = decode(payload) else {
            return Ok(());
        };

        match event {
            IncomingEvent::PaymentSuccess {
                payment_id,
                order_id,
                ..
            } => ack_or_retry(
                self.orders.mark_paid(order_id, payment_id).await,
                "mark paid",
            ),
            IncomingEvent::PaymentFailed {
                order_id, reason, ..
            } => ack_or_retry(
                self.orders.cancel_order(order_id, &reason).await,
                "cancel after failed payment",
            ),
            other => {
                warn!("unexpected event on payment topic: {other:?}");
                Ok(())
            }
        }
    }
}

/// Reacts to `kitchen.events`: advances preparation stages.
pub struct KitchenEventsHandler {
    orders: Arc<OrderService>,
}

impl KitchenEventsHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl EventHandler for KitchenEventsHandler {
    async fn handle(&self, _key: &[u8], payload: &[u8]) -> Result<()> {
        let Some(event) = decode(payload) else {
            return Ok(());
        };

        match event {
            IncomingEvent::KitchenAccepted { order_id } => ack_or_retry(
                self.orders
                    .update_status(order_id, OrderStatusName::Preparing)
                    .await,
                "start preparing",
            ),
            IncomingEvent::KitchenReady { order_id } => {
                ack_or_retry(self.orders.mark_ready(order_id).await, "mark ready")
            }
            IncomingEvent::KitchenHandedToCourier {
                order_id,
                delivery_id,
            } => ack_or_retry(
                self.orders.mark_delivering(order_id, delivery_id).await,
                "mark delivering",
            ),
            other => {
                warn!("unexpected event on kitchen topic: {other:?}");
                Ok(())
            }
        }
    }
}

/// Reacts to `delivery.events`: closes out delivered orders.
pub struct DeliveryEventsHandler {
    orders: Arc<OrderService>,
}

impl DeliveryEventsHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl EventHandler for DeliveryEventsHandler {
    async fn handle(&self, _key: &[u8], payload: &[u8]) -> Result<()> {
        let Some(event) = decode(payload) else {
            return Ok(());
        };

        match event {
            IncomingEvent::DeliveryCompleted { order_id } => {
                ack_or_retry(self.orders.mark_completed(order_id).await, "mark completed")
            }
            other => {
                warn!("unexpected event on delivery topic: {other:?}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn garbage_bytes_decode_to_none() {
        assert!(decode(b"not json at all").is_none());
    }

    #[test]
    fn unknown_event_type_decodes_to_none() {
        let env = model::Envelope::wrap("courier.lost", json!({"orderId": Uuid::new_v4()}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert!(decode(&raw).is_none());
    }

    #[test]
    fn known_event_decodes() {
        let order_id = Uuid::new_v4();
        let env = model::Envelope::wrap("delivery.completed", json!({"orderId": order_id}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert_eq!(
            decode(&raw),
            Some(IncomingEvent::DeliveryCompleted { order_id })
        );
    }

    #[test]
    fn permanent_failures_are_acknowledged() {
        let result: Result<(), OrderServiceError> = Err(OrderServiceError::IllegalTransition {
            from: OrderStatusName::Completed,
            to: OrderStatusName::Paid,
        });
        assert!(ack_or_retry(result, "test").is_ok());

        let result: Result<(), OrderServiceError> = Err(OrderServiceError::NotFound);
        assert!(ack_or_retry(result, "test").is_ok());
    }
}
