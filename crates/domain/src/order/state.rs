//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of a durable order.
///
/// Transitions only move forward:
/// ```text
/// Pending ──► Processing ──┬──► Shipped ──► Delivered
///    │            │        │       ▲
///    │            │        └──► PartiallyFailed
///    │            │                 │
///    └────────────┴─────────────────┴──► Cancelled
/// ```
/// `PartiallyFailed` is left only by an operator after manual
/// reconciliation, never back into `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,

    /// Created by the materializer; inventory adjustment in progress or done.
    Processing,

    /// At least one item could not be taken from inventory.
    PartiallyFailed,

    Shipped,

    /// Terminal.
    Delivered,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, PartiallyFailed)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (PartiallyFailed, Shipped)
                | (PartiallyFailed, Cancelled)
                | (Shipped, Delivered)
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::PartiallyFailed => "PARTIALLY_FAILED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PARTIALLY_FAILED" => Ok(OrderStatus::PartiallyFailed),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
