//! Domain event handlers behind the bus subscriptions.
//!
//! Each handler implements [`kafka_consumer::EventHandler`] and decides per
//! message whether to acknowledge (commit) or leave it for redelivery. The
//! shared idiom: malformed envelopes and permanently-failing operations
//! (unknown order, forbidden transition) are logged and acknowledged so they
//! cannot poison the partition; transient infrastructure failures are
//! returned as errors so the message comes back.

pub mod analytics;
pub mod order_info;
pub mod order_reactions;

pub use analytics::AnalyticsIngestHandler;
pub use order_info::OrderInfoHandler;
pub use order_reactions::{DeliveryEventsHandler, KitchenEventsHandler, PaymentEventsHandler};
