//! Payment aggregate and the short-lived order-info row used as a payment
//! eligibility window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatusName {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatusName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatusName::Pending => "pending",
            PaymentStatusName::Completed => "completed",
            PaymentStatusName::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatusName::Pending),
            "completed" => Some(PaymentStatusName::Completed),
            "failed" => Some(PaymentStatusName::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status as exposed over HTTP: lookup-table id plus the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub id: i32,
    pub name: PaymentStatusName,
}

/// Payment - one payment attempt for an order.
///
/// At most one payment per order may ever reach `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order information captured from an `order.created` event.
///
/// Acts as a capability token: an order is payable only while the backing
/// row's `expires_at` is in the future (30 minutes after capture).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInfo {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_serializes_with_camel_case_status_object() {
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: 150.0,
            currency: "RUB".into(),
            status: PaymentStatus {
                id: 2,
                name: PaymentStatusName::Completed,
            },
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let raw = serde_json::to_value(&payment).unwrap();
        assert_eq!(raw["status"]["name"], "completed");
        assert_eq!(raw["orderId"], serde_json::json!(payment.order_id));
        assert!(raw.get("failureReason").is_none());
    }

    #[test]
    fn failure_reason_appears_when_set() {
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: 10.0,
            currency: "RUB".into(),
            status: PaymentStatus {
                id: 3,
                name: PaymentStatusName::Failed,
            },
            failure_reason: Some("insufficient funds".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let raw = serde_json::to_value(&payment).unwrap();
        assert_eq!(raw["failureReason"], "insufficient funds");
    }
}
