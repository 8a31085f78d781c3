//! Cart snapshot endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::UserId;
use domain::{Cart, CartItem, Money};
use serde::{Deserialize, Serialize};
use store::CheckoutStore;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PutCartRequest {
    pub items: Vec<CartItemRequest>,
}

#[derive(Deserialize)]
pub struct CartItemRequest {
    pub product_id: String,
    pub quantity: u32,
    /// Price seen by the user when the item was added.
    pub unit_price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub total_cents: i64,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            user_id: cart.user_id.to_string(),
            total_cents: cart.snapshot_total().cents(),
            updated_at: cart.updated_at.to_rfc3339(),
            items: cart
                .items
                .into_iter()
                .map(|item| CartItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// PUT /carts/:user_id: replace the user's cart snapshot.
#[tracing::instrument(skip(state, req))]
pub async fn put<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    Json(req): Json<PutCartRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let items = req
        .items
        .into_iter()
        .map(|item| {
            CartItem::new(
                item.product_id,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();
    let cart = Cart::with_items(UserId::new(user_id), items)?;

    state.store.put_cart(&cart).await?;
    tracing::info!(user_id = %cart.user_id, items = cart.items.len(), "cart stored");

    Ok(Json(CartResponse::from(cart)))
}

/// GET /carts/:user_id: read the user's cart snapshot.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .store
        .get_cart(&UserId::new(user_id.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Cart of user {user_id} not found")))?;

    Ok(Json(CartResponse::from(cart)))
}
