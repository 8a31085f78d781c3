//! Messages exchanged between the workflow, the queue and the notifier.

use chrono::{DateTime, Utc};
use common::{CheckoutAttemptId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::OrderItem;
use crate::value_objects::{Money, ProductId, ShippingAddress};

/// Queue payload asking for an order to be materialized.
///
/// Immutable: the queue redelivers it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMessage {
    pub checkout_attempt_id: CheckoutAttemptId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub payment_id: String,
    pub total_amount: Money,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

/// Event handed to the notification dispatcher once an order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderNotification {
    /// Every item was taken from inventory.
    OrderConfirmed(OrderNotificationData),

    /// The order was created but some items are short.
    OrderPartiallyFailed(OrderPartiallyFailedData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotificationData {
    pub order_id: OrderId,
    pub checkout_attempt_id: CheckoutAttemptId,
    pub user_id: UserId,
    pub total_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPartiallyFailedData {
    pub order_id: OrderId,
    pub checkout_attempt_id: CheckoutAttemptId,
    pub user_id: UserId,
    pub short_items: Vec<ProductId>,
}

impl OrderNotification {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderNotification::OrderConfirmed(_) => "OrderConfirmed",
            OrderNotification::OrderPartiallyFailed(_) => "OrderPartiallyFailed",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            OrderNotification::OrderConfirmed(data) => data.order_id,
            OrderNotification::OrderPartiallyFailed(data) => data.order_id,
        }
    }
}
