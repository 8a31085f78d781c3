//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;
use crate::payment::PaymentStatus;

/// Errors raised when a domain rule is violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantity must be strictly positive.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Unit price must not be negative.
    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: String, price: i64 },

    /// Merged quantity of a product does not fit in a `u32`.
    #[error("Quantity overflow for {product_id}")]
    QuantityOverflow { product_id: String },

    /// Total amount does not fit in an `i64` of cents.
    #[error("Amount overflow: total exceeds {max} cents", max = i64::MAX)]
    AmountOverflow,

    /// Order status only moves forward along the transition table.
    #[error("Invalid order status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// A payment intent may only be refunded after it succeeded.
    #[error("Invalid payment status transition: {from} -> {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}
