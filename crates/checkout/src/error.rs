//! Checkout error types.

use common::UserId;
use domain::{DomainError, Money, ProductId};
use queue::QueueError;
use serde::{Deserialize, Serialize};
use store::StoreError;
use thiserror::Error;

use crate::services::gateway::GatewayError;

/// Why a cart item no longer matches the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    PriceChanged { snapshot_price: Money, live_price: Money },
    InsufficientStock { requested: u32, available: u32 },
    ProductUnavailable,
    InvalidQuantity,
}

/// One cart item with every issue found for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleItem {
    pub product_id: ProductId,
    pub reasons: Vec<StaleReason>,
}

/// The cart snapshot disagrees with the catalog.
///
/// Lists every affected item, not just the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Cart is stale: {} item(s) changed", items.len())]
pub struct CartStaleError {
    pub items: Vec<StaleItem>,
}

/// The gateway declined the charge. Terminal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Payment declined: {decline_code}")]
pub struct PaymentDeclinedError {
    pub decline_code: String,
    pub payment_id: String,
}

/// Taking an order item from inventory would have made the stock negative.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
pub struct InventoryConflictError {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// Errors that can occur during checkout and order materialization.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The user has no cart, or an empty one.
    #[error("Cart of user {0} is empty")]
    EmptyCart(UserId),

    #[error(transparent)]
    CartStale(#[from] CartStaleError),

    #[error(transparent)]
    PaymentDeclined(#[from] PaymentDeclinedError),

    /// The gateway failed, either after every retry or with a terminal error.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(#[from] GatewayError),

    /// The order message could not be published after every retry.
    #[error("Queue publish error: {0}")]
    QueuePublish(#[from] QueueError),

    /// The workflow deadline passed during `step`.
    #[error("Checkout timed out during {step}")]
    Timeout { step: &'static str },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl CheckoutError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart(_) => "empty_cart",
            CheckoutError::CartStale(_) => "cart_stale",
            CheckoutError::PaymentDeclined(_) => "payment_declined",
            CheckoutError::PaymentGateway(_) => "payment_gateway",
            CheckoutError::QueuePublish(_) => "queue_publish",
            CheckoutError::Timeout { .. } => "timeout",
            CheckoutError::Store(_) => "store",
            CheckoutError::Domain(_) => "domain",
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
