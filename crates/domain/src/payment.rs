//! Payment intent as reported by the payment gateway.

use common::CheckoutAttemptId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::Money;

/// Lifecycle of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Declined,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Declined => "DECLINED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A charge at the payment gateway.
///
/// Immutable once `Succeeded`, except for the later move to `Refunded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Identifier assigned by the gateway.
    pub gateway_id: String,
    pub amount: Money,
    /// Lower-case ISO 4217 code.
    pub currency: String,
    pub status: PaymentStatus,
    /// The checkout attempt the charge belongs to.
    pub idempotency_key: CheckoutAttemptId,
    /// Gateway reason code when declined (e.g. `insufficient_funds`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
}

impl PaymentIntent {
    /// Marks a succeeded intent as refunded.
    pub fn mark_refunded(&mut self) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Succeeded {
            return Err(DomainError::InvalidPaymentTransition {
                from: self.status,
                to: PaymentStatus::Refunded,
            });
        }
        self.status = PaymentStatus::Refunded;
        Ok(())
    }
}
