//! Business logic layer of the engine.
//!
//! Three services share one discipline: every mutating operation runs inside
//! a single database transaction that covers the domain write, the outbox
//! record and any auxiliary column updates, so an event can never exist
//! without its domain fact or vice versa. Cache side-effects happen after
//! commit and are best-effort.

pub mod analytics;
pub mod order;
pub mod payment;

pub use analytics::{AnalyticsMetrics, AnalyticsService, AnalyticsServiceError};
pub use order::{OrderService, OrderServiceError};
pub use payment::{
    GatewayOutcome, PaymentGateway, PaymentService, PaymentServiceError, SimulatedGateway,
};
