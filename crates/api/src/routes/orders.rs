//! Order read, polling and operator transition endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{CheckoutAttemptId, OrderId};
use domain::{Order, OrderStatus, ShippingAddress};
use serde::{Deserialize, Serialize};
use store::CheckoutStore;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub checkout_attempt_id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub payment_id: String,
    pub shipping_address: ShippingAddress,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.order_id.to_string(),
            checkout_attempt_id: order.checkout_attempt_id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status,
            total_cents: order.total_amount.cents(),
            payment_id: order.payment_id,
            shipping_address: order.shipping_address,
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// GET /orders/:id: load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(order)))
}

/// GET /orders?status=...: list orders in one status, oldest first.
#[tracing::instrument(skip(state, query), fields(status = %query.status))]
pub async fn list<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.store.list_by_status(query.status).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /checkouts/:checkout_attempt_id/order: poll for the order a
/// checkout produced.
///
/// 404 until the queued message has been materialized.
#[tracing::instrument(skip(state))]
pub async fn by_checkout_attempt<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(checkout_attempt_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let attempt: CheckoutAttemptId = parse_id(&checkout_attempt_id)?;
    let order = state
        .store
        .find_by_checkout_attempt(attempt)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No order for checkout attempt {checkout_attempt_id} yet"
            ))
        })?;

    Ok(Json(OrderResponse::from(order)))
}

/// POST /orders/:id/status: operator moves an order forward (ship,
/// deliver, cancel).
#[tracing::instrument(skip(state, req), fields(to = %req.status))]
pub async fn update_status<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let current = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    let order = state
        .store
        .update_status(order_id, current.status, req.status)
        .await?;
    tracing::info!(%order_id, from = %current.status, to = %order.status, "order status updated");

    Ok(Json(OrderResponse::from(order)))
}
