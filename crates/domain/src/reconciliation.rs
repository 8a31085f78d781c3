//! Operator work items raised when the pipeline cannot settle on its own.

use chrono::{DateTime, Utc};
use common::{CheckoutAttemptId, OrderId};
use serde::{Deserialize, Serialize};

common::uuid_id!(
    /// Identifier of a reconciliation item.
    ReconciliationId
);

/// What an operator has to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationKind {
    /// An order was created but some items could not be taken from inventory.
    PartiallyFailedOrder,
    /// A charge was captured, no order exists, and every refund attempt failed.
    RefundFailed,
    /// The workflow deadline passed while the charge was in flight.
    ChargeOutcomeUnknown,
    /// The workflow deadline passed while the order message was being
    /// published; the charge was compensated but the message may have landed.
    EnqueueOutcomeUnknown,
}

impl ReconciliationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationKind::PartiallyFailedOrder => "PARTIALLY_FAILED_ORDER",
            ReconciliationKind::RefundFailed => "REFUND_FAILED",
            ReconciliationKind::ChargeOutcomeUnknown => "CHARGE_OUTCOME_UNKNOWN",
            ReconciliationKind::EnqueueOutcomeUnknown => "ENQUEUE_OUTCOME_UNKNOWN",
        }
    }
}

impl std::fmt::Display for ReconciliationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReconciliationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARTIALLY_FAILED_ORDER" => Ok(ReconciliationKind::PartiallyFailedOrder),
            "REFUND_FAILED" => Ok(ReconciliationKind::RefundFailed),
            "CHARGE_OUTCOME_UNKNOWN" => Ok(ReconciliationKind::ChargeOutcomeUnknown),
            "ENQUEUE_OUTCOME_UNKNOWN" => Ok(ReconciliationKind::EnqueueOutcomeUnknown),
            other => Err(format!("unknown reconciliation kind: {other}")),
        }
    }
}

/// One problem awaiting an operator.
///
/// At most one item exists per kind and checkout attempt. It stays listed
/// until an operator resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub item_id: ReconciliationId,
    pub kind: ReconciliationKind,
    pub checkout_attempt_id: CheckoutAttemptId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator note recorded on resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ReconciliationItem {
    pub fn new(
        kind: ReconciliationKind,
        checkout_attempt_id: CheckoutAttemptId,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            item_id: ReconciliationId::new(),
            kind,
            checkout_attempt_id,
            order_id: None,
            payment_id: None,
            detail: detail.into(),
            raised_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_payment(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Closes the item with an operator note.
    pub fn resolve(&mut self, resolution: impl Into<String>) {
        self.resolved_at = Some(Utc::now());
        self.resolution = Some(resolution.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_screaming_snake_case() {
        let json = serde_json::to_value(ReconciliationKind::PartiallyFailedOrder).unwrap();
        assert_eq!(json, "PARTIALLY_FAILED_ORDER");
        assert_eq!(
            "ENQUEUE_OUTCOME_UNKNOWN".parse::<ReconciliationKind>(),
            Ok(ReconciliationKind::EnqueueOutcomeUnknown)
        );
        assert!("NOPE".parse::<ReconciliationKind>().is_err());
    }

    #[test]
    fn resolve_closes_item() {
        let mut item = ReconciliationItem::new(
            ReconciliationKind::RefundFailed,
            CheckoutAttemptId::new(),
            "refund failed",
        )
        .with_payment("pi_1");
        assert!(item.is_open());

        item.resolve("refunded by hand");

        assert!(!item.is_open());
        assert_eq!(item.resolution.as_deref(), Some("refunded by hand"));
    }

    #[test]
    fn open_item_omits_resolution_fields() {
        let item = ReconciliationItem::new(
            ReconciliationKind::ChargeOutcomeUnknown,
            CheckoutAttemptId::new(),
            "timeout",
        );
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("resolved_at").is_none());
        assert_eq!(json["kind"], "CHARGE_OUTCOME_UNKNOWN");
    }
}
