//! Transactional outbox statuses.

use serde::{Deserialize, Serialize};

/// Relay status of an outbox record.
///
/// `pending` is a committed domain fact not yet observable externally,
/// `processed` was acknowledged by the broker at least once, `failed` awaits
/// requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatusName {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatusName {
    /// The status name as stored in the `outbox_status` lookup table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatusName::Pending => "pending",
            OutboxStatusName::Processed => "processed",
            OutboxStatusName::Failed => "failed",
        }
    }
}
