//! Wire-level event envelope and typed event payloads.
//!
//! Every message on the bus is an [`Envelope`]: a fresh event id, the event
//! type discriminator, the UTC emission timestamp and the raw payload under
//! `data`. Outgoing payloads are built from [`DomainEvent`]; incoming ones
//! are decoded into [`IncomingEvent`] keyed by the envelope's `eventType`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform wrapper around any domain event on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Spelled "occuredAt" on the wire; deployed consumers depend on it.
    #[serde(rename = "occuredAt")]
    pub occurred_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wraps a payload into a fresh envelope with a new event id stamped now.
    pub fn wrap(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            occurred_at: Utc::now(),
            data,
        }
    }
}

/// An event emitted by this constellation through the outbox.
///
/// The variant decides the `eventType` discriminator and the aggregate it
/// belongs to; the serialized form is the bare payload (the discriminator
/// travels in the envelope, not in `data`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_price: f64,
    },
    #[serde(rename_all = "camelCase")]
    OrderPaid { order_id: Uuid, payment_id: Uuid },
    #[serde(rename_all = "camelCase")]
    OrderCancelled { order_id: Uuid, reason: String },
    #[serde(rename_all = "camelCase")]
    OrderPrepared { order_id: Uuid },
    #[serde(rename_all = "camelCase")]
    OrderDelivering { order_id: Uuid, delivery_id: Uuid },
    #[serde(rename_all = "camelCase")]
    OrderCompleted { order_id: Uuid },
    #[serde(rename_all = "camelCase")]
    PaymentSuccess {
        payment_id: Uuid,
        order_id: Uuid,
        amount: f64,
    },
    #[serde(rename_all = "camelCase")]
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
}

impl DomainEvent {
    /// The `eventType` discriminator carried in the envelope.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "order.created",
            DomainEvent::OrderPaid { .. } => "order.paid",
            DomainEvent::OrderCancelled { .. } => "order.cancelled",
            DomainEvent::OrderPrepared { .. } => "order.prepared",
            DomainEvent::OrderDelivering { .. } => "order.delivering",
            DomainEvent::OrderCompleted { .. } => "order.completed",
            DomainEvent::PaymentSuccess { .. } => "payment.success",
            DomainEvent::PaymentFailed { .. } => "payment.failed",
        }
    }

    /// The aggregate kind this event describes, as stored in the outbox.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            DomainEvent::PaymentSuccess { .. } | DomainEvent::PaymentFailed { .. } => "payment",
            _ => "order",
        }
    }

    /// The root identity of the aggregate the event describes.
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::OrderPaid { order_id, .. }
            | DomainEvent::OrderCancelled { order_id, .. }
            | DomainEvent::OrderPrepared { order_id }
            | DomainEvent::OrderDelivering { order_id, .. }
            | DomainEvent::OrderCompleted { order_id } => *order_id,
            DomainEvent::PaymentSuccess { payment_id, .. }
            | DomainEvent::PaymentFailed { payment_id, .. } => *payment_id,
        }
    }

    /// The serialized payload as stored in the outbox `payload` column.
    pub fn payload(&self) -> serde_json::Value {
        // Struct variants always serialize to a JSON object.
        serde_json::to_value(self).expect("domain event payload serialization")
    }
}

/// Failure to decode an envelope or its payload.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid payload for {event_type}: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An event consumed by the order state machine from the payment, kitchen and
/// delivery topics.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    PaymentSuccess {
        payment_id: Uuid,
        order_id: Uuid,
        amount: f64,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
    KitchenAccepted {
        order_id: Uuid,
    },
    KitchenReady {
        order_id: Uuid,
    },
    KitchenHandedToCourier {
        order_id: Uuid,
        delivery_id: Uuid,
    },
    DeliveryCompleted {
        order_id: Uuid,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentSuccessData {
    payment_id: Uuid,
    order_id: Uuid,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentFailedData {
    payment_id: Uuid,
    order_id: Uuid,
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRefData {
    order_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandedToCourierData {
    order_id: Uuid,
    delivery_id: Uuid,
}

impl IncomingEvent {
    /// Parses raw message bytes into an envelope.
    pub fn parse_envelope(raw: &[u8]) -> Result<Envelope, EventDecodeError> {
        serde_json::from_slice(raw).map_err(EventDecodeError::Envelope)
    }

    /// Decodes the payload of an envelope into a typed event.
    ///
    /// Returns `Ok(None)` for event types this machine does not react to, so
    /// callers can acknowledge them without branching on strings.
    pub fn decode(env: &Envelope) -> Result<Option<Self>, EventDecodeError> {
        let payload = |e| EventDecodeError::Payload {
            event_type: env.event_type.clone(),
            source: e,
        };

        let event = match env.event_type.as_str() {
            "payment.success" => {
                let d: PaymentSuccessData =
                    serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::PaymentSuccess {
                    payment_id: d.payment_id,
                    order_id: d.order_id,
                    amount: d.amount,
                }
            }
            "payment.failed" => {
                let d: PaymentFailedData =
                    serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::PaymentFailed {
                    payment_id: d.payment_id,
                    order_id: d.order_id,
                    reason: d.reason,
                }
            }
            "kitchen.accepted" => {
                let d: OrderRefData = serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::KitchenAccepted {
                    order_id: d.order_id,
                }
            }
            "kitchen.ready" => {
                let d: OrderRefData = serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::KitchenReady {
                    order_id: d.order_id,
                }
            }
            "kitchen.handedToCourier" => {
                let d: HandedToCourierData =
                    serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::KitchenHandedToCourier {
                    order_id: d.order_id,
                    delivery_id: d.delivery_id,
                }
            }
            "delivery.completed" => {
                let d: OrderRefData = serde_json::from_value(env.data.clone()).map_err(payload)?;
                IncomingEvent::DeliveryCompleted {
                    order_id: d.order_id,
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_field_names() {
        let env = Envelope::wrap("order.created", json!({"orderId": Uuid::nil()}));
        let raw = serde_json::to_value(&env).unwrap();

        assert!(raw.get("eventId").is_some());
        assert!(raw.get("eventType").is_some());
        // Historical wire spelling, kept for compatibility.
        assert!(raw.get("occuredAt").is_some());
        assert!(raw.get("occurredAt").is_none());
        assert!(raw.get("data").is_some());
    }

    #[test]
    fn envelope_round_trips() {
        let env = Envelope::wrap("payment.success", json!({"amount": 150.0}));
        let raw = serde_json::to_vec(&env).unwrap();
        let back: Envelope = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn domain_event_payload_is_bare_camel_case() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let ev = DomainEvent::OrderCreated {
            order_id,
            user_id,
            total_price: 150.0,
        };

        assert_eq!(ev.event_type(), "order.created");
        assert_eq!(ev.aggregate_type(), "order");
        assert_eq!(ev.aggregate_id(), order_id);
        assert_eq!(
            ev.payload(),
            json!({
                "orderId": order_id,
                "userId": user_id,
                "totalPrice": 150.0,
            })
        );
    }

    #[test]
    fn payment_events_belong_to_the_payment_aggregate() {
        let payment_id = Uuid::new_v4();
        let ev = DomainEvent::PaymentFailed {
            payment_id,
            order_id: Uuid::new_v4(),
            reason: "insufficient funds".into(),
        };
        assert_eq!(ev.event_type(), "payment.failed");
        assert_eq!(ev.aggregate_type(), "payment");
        assert_eq!(ev.aggregate_id(), payment_id);
    }

    #[test]
    fn decodes_known_incoming_events() {
        let order_id = Uuid::new_v4();
        let delivery_id = Uuid::new_v4();
        let env = Envelope::wrap(
            "kitchen.handedToCourier",
            json!({"orderId": order_id, "deliveryId": delivery_id}),
        );

        let ev = IncomingEvent::decode(&env).unwrap().unwrap();
        assert_eq!(
            ev,
            IncomingEvent::KitchenHandedToCourier {
                order_id,
                delivery_id
            }
        );
    }

    #[test]
    fn unknown_event_type_decodes_to_none() {
        let env = Envelope::wrap("courier.lost", json!({"orderId": Uuid::new_v4()}));
        assert_eq!(IncomingEvent::decode(&env).unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let env = Envelope::wrap("payment.success", json!({"orderId": "not-a-uuid"}));
        assert!(IncomingEvent::decode(&env).is_err());
    }
}
