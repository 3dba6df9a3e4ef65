//! HTTP surface of the order service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use model::{NewOrder, NewOrderItem, Order};
use serde::{Deserialize, Serialize};
use service::{OrderService, OrderServiceError};
use uuid::Uuid;

use crate::PageParams;

#[derive(Clone)]
struct OrderState {
    service: Arc<OrderService>,
}

/// Builds the order service router.
pub fn router(service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(get_all_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/user/{userId}", get(get_orders_by_user))
        .route("/orders/user/{userId}/active", get(get_active_orders))
        .with_state(OrderState { service })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRequest {
    customer_id: Uuid,
    total_amount: f64,
    currency: String,
    items: Vec<CreateOrderItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderItemRequest {
    product_id: Uuid,
    product_name: String,
    product_price: f64,
    amount: i32,
    total_price: f64,
    #[serde(default)]
    notes: String,
}

#[derive(Serialize)]
struct OrdersResponse {
    orders: Vec<Order>,
    total: i64,
    limit: i64,
    offset: i64,
}

#[derive(Serialize)]
struct ActiveOrdersResponse {
    orders: Vec<Order>,
    total: i64,
}

async fn create_order(
    State(state): State<OrderState>,
    Json(req): Json<CreateOrderRequest>,
) -> Response {
    let new_order = NewOrder {
        customer_id: req.customer_id,
        total_amount: req.total_amount,
        currency: req.currency,
        items: req
            .items
            .into_iter()
            .map(|i| NewOrderItem {
                product_id: i.product_id,
                product_name: i.product_name,
                product_price: i.product_price,
                amount: i.amount,
                total_price: i.total_price,
                notes: i.notes,
            })
            .collect(),
    };

    match state.service.create_order(new_order).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_order(State(state): State<OrderState>, Path(id): Path<Uuid>) -> Response {
    match state.service.get_by_id(id).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_all_orders(
    State(state): State<OrderState>,
    Query(page): Query<PageParams>,
) -> Response {
    let (limit, offset) = match page.validate() {
        Ok(page) => page,
        Err(reject) => return reject.into_response(),
    };

    match state.service.get_all(limit, offset).await {
        Ok((orders, total)) => Json(OrdersResponse {
            orders,
            total,
            limit,
            offset,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_orders_by_user(
    State(state): State<OrderState>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Response {
    let (limit, offset) = match page.validate() {
        Ok(page) => page,
        Err(reject) => return reject.into_response(),
    };

    match state.service.get_by_user(user_id, limit, offset).await {
        Ok((orders, total)) => Json(OrdersResponse {
            orders,
            total,
            limit,
            offset,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_active_orders(State(state): State<OrderState>, Path(user_id): Path<Uuid>) -> Response {
    match state.service.get_active_by_user(user_id).await {
        Ok(orders) => {
            let total = orders.len() as i64;
            Json(ActiveOrdersResponse { orders, total }).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: OrderServiceError) -> Response {
    let status = match &e {
        OrderServiceError::InvalidOrder(_) | OrderServiceError::IllegalTransition { .. } => {
            StatusCode::BAD_REQUEST
        }
        OrderServiceError::NotFound => StatusCode::NOT_FOUND,
        OrderServiceError::AlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::CreateOrderRequest;

    #[test]
    fn create_request_parses_the_documented_shape() {
        let raw = r#"
        {
            "customerId": "a1000000-0000-0000-0000-000000000001",
            "totalAmount": 150.0,
            "currency": "USD",
            "items": [
                {
                    "productId": "b1000000-0000-0000-0000-000000000001",
                    "productName": "Pizza",
                    "productPrice": 50.0,
                    "amount": 2,
                    "totalPrice": 100.0
                },
                {
                    "productId": "b1000000-0000-0000-0000-000000000002",
                    "productName": "Cola",
                    "productPrice": 5.0,
                    "amount": 10,
                    "totalPrice": 50.0,
                    "notes": "no ice"
                }
            ]
        }
        "#;

        let req: CreateOrderRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.total_amount, 150.0);
        assert_eq!(req.items.len(), 2);
        // Notes are optional and default to empty.
        assert_eq!(req.items[0].notes, "");
        assert_eq!(req.items[1].notes, "no ice");
        assert_eq!(req.items[1].amount, 10);
    }
}
