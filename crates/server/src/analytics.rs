//! HTTP surface of the analytics service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use model::{OrderEvent, OrderStats};
use serde::{Deserialize, Serialize};
use service::{AnalyticsService, AnalyticsServiceError};
use uuid::Uuid;

#[derive(Clone)]
struct AnalyticsState {
    service: Arc<AnalyticsService>,
}

/// Builds the analytics service router.
pub fn router(service: Arc<AnalyticsService>) -> Router {
    Router::new()
        .route("/analytics/stats", get(get_stats))
        .route("/analytics/revenue", get(get_revenue))
        .route("/analytics/orders/{orderId}/events", get(get_order_events))
        .with_state(AnalyticsState { service })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateRangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

impl DateRangeParams {
    /// Parses both bounds as RFC 3339 and requires `end > start`.
    fn validate(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), (StatusCode, String)> {
        let (Some(start_raw), Some(end_raw)) = (&self.start_date, &self.end_date) else {
            return Err((
                StatusCode::BAD_REQUEST,
                "startDate and endDate are required".into(),
            ));
        };

        let start = DateTime::parse_from_rfc3339(start_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "invalid startDate format, expected RFC3339".into(),
                )
            })?;

        let end = DateTime::parse_from_rfc3339(end_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "invalid endDate format, expected RFC3339".into(),
                )
            })?;

        if end <= start {
            return Err((
                StatusCode::BAD_REQUEST,
                "endDate must be after startDate".into(),
            ));
        }

        Ok((start, end))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    stats: Vec<OrderStats>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevenueResponse {
    revenue: f64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderEventsResponse {
    order_id: Uuid,
    events: Vec<OrderEvent>,
    total: i64,
}

async fn get_stats(
    State(state): State<AnalyticsState>,
    Query(range): Query<DateRangeParams>,
) -> Response {
    let (start, end) = match range.validate() {
        Ok(range) => range,
        Err(reject) => return reject.into_response(),
    };

    match state.service.get_stats(start, end).await {
        Ok(stats) => Json(StatsResponse {
            stats,
            start_date: start,
            end_date: end,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_revenue(
    State(state): State<AnalyticsState>,
    Query(range): Query<DateRangeParams>,
) -> Response {
    let (start, end) = match range.validate() {
        Ok(range) => range,
        Err(reject) => return reject.into_response(),
    };

    match state.service.get_revenue(start, end).await {
        Ok(revenue) => Json(RevenueResponse {
            revenue,
            start_date: start,
            end_date: end,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_order_events(
    State(state): State<AnalyticsState>,
    Path(order_id): Path<Uuid>,
) -> Response {
    match state.service.get_order_events(order_id).await {
        Ok(events) => {
            let total = events.len() as i64;
            Json(OrderEventsResponse {
                order_id,
                events,
                total,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: AnalyticsServiceError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::DateRangeParams;

    fn range(start: Option<&str>, end: Option<&str>) -> DateRangeParams {
        DateRangeParams {
            start_date: start.map(String::from),
            end_date: end.map(String::from),
        }
    }

    #[test]
    fn valid_range_parses() {
        let params = range(Some("2025-01-01T00:00:00Z"), Some("2025-01-02T00:00:00Z"));
        let (start, end) = params.validate().unwrap();
        assert!(end > start);
    }

    #[test]
    fn missing_bounds_are_rejected() {
        assert!(range(None, Some("2025-01-02T00:00:00Z")).validate().is_err());
        assert!(range(Some("2025-01-01T00:00:00Z"), None).validate().is_err());
    }

    #[test]
    fn equal_bounds_are_rejected() {
        let params = range(Some("2025-01-01T00:00:00Z"), Some("2025-01-01T00:00:00Z"));
        assert!(params.validate().is_err());
    }

    #[test]
    fn non_rfc3339_input_is_rejected() {
        assert!(range(Some("yesterday"), Some("2025-01-02T00:00:00Z"))
            .validate()
            .is_err());
    }
}
