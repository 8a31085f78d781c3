//! Durable order created by the materializer.

mod state;

pub use state::OrderStatus;

use chrono::{DateTime, Utc};
use common::{CheckoutAttemptId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::message::OrderMessage;
use crate::value_objects::{Money, ProductId, ShippingAddress};

/// An item of an order, priced at validation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A durable order.
///
/// At most one order exists per checkout attempt; the store enforces it with
/// a unique index on `checkout_attempt_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub checkout_attempt_id: CheckoutAttemptId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub payment_id: String,
    pub shipping_address: ShippingAddress,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new `Processing` order from a queued message.
    ///
    /// The order id is freshly generated; only the checkout attempt id links
    /// the order back to the message.
    pub fn from_message(message: &OrderMessage) -> Self {
        let now = Utc::now();
        Self {
            order_id: OrderId::new(),
            checkout_attempt_id: message.checkout_attempt_id,
            user_id: message.user_id.clone(),
            items: message.items.clone(),
            total_amount: message.total_amount,
            payment_id: message.payment_id.clone(),
            shipping_address: message.shipping_address.clone(),
            status: OrderStatus::Processing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the order forward, rejecting transitions outside the table.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sum of the item totals.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::total_price).sum()
    }
}
