//! Analytics-side event row and derived statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ingested order event.
///
/// `event_id` carries the bus envelope id verbatim and is unique-constrained;
/// ingesting the same envelope twice leaves exactly one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-day, per-event-type aggregate over the events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub date: DateTime<Utc>,
    pub event_type: String,
    pub count: i64,
    pub unique_orders: i64,
    pub unique_users: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
}
