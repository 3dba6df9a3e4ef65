//! HTTP surface of the payment service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use model::{Payment, PaymentStatusName};
use serde::{Deserialize, Serialize};
use service::{PaymentService, PaymentServiceError, SimulatedGateway};
use uuid::Uuid;

use crate::PageParams;

#[derive(Clone)]
struct PaymentState {
    service: Arc<PaymentService<SimulatedGateway>>,
}

/// Builds the payment service router.
pub fn router(service: Arc<PaymentService<SimulatedGateway>>) -> Router {
    Router::new()
        .route("/payments", post(process_payment).get(get_payments))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/order/{orderId}", get(get_payment_by_order))
        .with_state(PaymentState { service })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPaymentRequest {
    order_id: Uuid,
    amount: f64,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentFilterParams {
    limit: Option<i64>,
    offset: Option<i64>,
    status: Option<String>,
}

#[derive(Serialize)]
struct PaymentsResponse {
    payments: Vec<Payment>,
    total: i64,
    limit: i64,
    offset: i64,
}

async fn process_payment(
    State(state): State<PaymentState>,
    Json(req): Json<ProcessPaymentRequest>,
) -> Response {
    match state.service.process_payment(req.order_id, req.amount).await {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_payment(State(state): State<PaymentState>, Path(id): Path<Uuid>) -> Response {
    match state.service.get_by_id(id).await {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_payment_by_order(
    State(state): State<PaymentState>,
    Path(order_id): Path<Uuid>,
) -> Response {
    match state.service.get_by_order_id(order_id).await {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_payments(
    State(state): State<PaymentState>,
    Query(params): Query<PaymentFilterParams>,
) -> Response {
    let page = PageParams {
        limit: params.limit,
        offset: params.offset,
    };
    let (limit, offset) = match page.validate() {
        Ok(page) => page,
        Err(reject) => return reject.into_response(),
    };

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match PaymentStatusName::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (StatusCode::BAD_REQUEST, "invalid status parameter").into_response()
            }
        },
    };

    match state.service.list(limit, offset, status).await {
        Ok((payments, total)) => Json(PaymentsResponse {
            payments,
            total,
            limit,
            offset,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: PaymentServiceError) -> Response {
    let status = match &e {
        PaymentServiceError::InvalidAmount => StatusCode::BAD_REQUEST,
        PaymentServiceError::OrderNotFound | PaymentServiceError::PaymentNotFound => {
            StatusCode::NOT_FOUND
        }
        PaymentServiceError::OrderAlreadyPaid => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}
