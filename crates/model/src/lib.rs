//! Domain model shared by the order, payment and analytics services.
//!
//! Contains the order aggregate with its lifecycle state machine, the payment
//! aggregate, the transactional outbox record, the analytics event row, and
//! the wire-level event envelope with typed payloads.

pub mod analytics;
pub mod event;
pub mod order;
pub mod outbox;
pub mod payment;

pub use analytics::{OrderEvent, OrderStats};
pub use event::{DomainEvent, Envelope, EventDecodeError, IncomingEvent};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderStatusName};
pub use outbox::OutboxStatusName;
pub use payment::{OrderInfo, Payment, PaymentStatus, PaymentStatusName};
