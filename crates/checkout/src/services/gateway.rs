//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CheckoutAttemptId;
use domain::{Money, PaymentIntent, PaymentStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors reported by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Timeout or 5xx-class failure; the same request may be retried.
    #[error("Transient gateway failure: {0}")]
    Transient(String),

    /// The gateway answered with something that is neither success nor decline.
    #[error("Unexpected payment status {status} for {payment_id}")]
    UnexpectedStatus {
        payment_id: String,
        status: PaymentStatus,
    },

    /// The payment to refund is unknown or cannot be refunded.
    #[error("Refund rejected for {payment_id}: {reason}")]
    RefundRejected { payment_id: String, reason: String },
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// A create-and-confirm charge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub currency: String,
    /// Opaque reference to the customer's payment method.
    pub payment_method_ref: String,
    /// Reused on every retry so the gateway charges at most once.
    pub idempotency_key: CheckoutAttemptId,
}

/// Result of a successful refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub payment_id: String,
    pub amount: Money,
}

/// Trait for payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates and confirms a payment in one call.
    ///
    /// A decline is a successful call returning an intent with status
    /// `Declined`; only transport-level failures are errors.
    async fn create_and_confirm_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Refunds a succeeded payment. Refunding twice returns the first refund.
    async fn refund(&self, payment_id: &str) -> Result<RefundResult, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<CheckoutAttemptId, PaymentIntent>,
    refunds: HashMap<String, RefundResult>,
    declined_methods: HashMap<String, String>,
    next_id: u32,
    charge_calls: u32,
    refund_calls: u32,
    transient_charge_failures: u32,
    transient_refund_failures: u32,
    charge_delay: Option<Duration>,
    respond_pending: bool,
}

/// In-memory payment gateway for testing and the default server.
///
/// Charges are deduplicated by idempotency key, so a retried request returns
/// the intent of the first one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge made with `payment_method_ref`.
    pub async fn decline_method(&self, payment_method_ref: &str, decline_code: &str) {
        self.state
            .write()
            .await
            .declined_methods
            .insert(payment_method_ref.to_string(), decline_code.to_string());
    }

    /// Makes the next `n` charge calls fail transiently before reaching the ledger.
    pub async fn fail_next_charges(&self, n: u32) {
        self.state.write().await.transient_charge_failures = n;
    }

    /// Makes the next `n` refund calls fail transiently.
    pub async fn fail_next_refunds(&self, n: u32) {
        self.state.write().await.transient_refund_failures = n;
    }

    /// Delays every charge call by `delay`.
    pub async fn set_charge_delay(&self, delay: Option<Duration>) {
        self.state.write().await.charge_delay = delay;
    }

    /// Leaves new intents in `Pending` instead of confirming them.
    pub async fn set_respond_pending(&self, pending: bool) {
        self.state.write().await.respond_pending = pending;
    }

    pub async fn charge_calls(&self) -> u32 {
        self.state.read().await.charge_calls
    }

    pub async fn refund_calls(&self) -> u32 {
        self.state.read().await.refund_calls
    }

    /// Number of distinct charges recorded, one per idempotency key.
    pub async fn intent_count(&self) -> usize {
        self.state.read().await.intents.len()
    }

    pub async fn intent_for(&self, idempotency_key: CheckoutAttemptId) -> Option<PaymentIntent> {
        self.state
            .read()
            .await
            .intents
            .get(&idempotency_key)
            .cloned()
    }

    pub async fn refunds(&self) -> Vec<RefundResult> {
        self.state.read().await.refunds.values().cloned().collect()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_and_confirm_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let delay = self.state.read().await.charge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        state.charge_calls += 1;

        if state.transient_charge_failures > 0 {
            state.transient_charge_failures -= 1;
            return Err(GatewayError::Transient("503 Service Unavailable".to_string()));
        }

        if let Some(existing) = state.intents.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let decline_code = state
            .declined_methods
            .get(&request.payment_method_ref)
            .cloned();
        let status = match (&decline_code, state.respond_pending) {
            (Some(_), _) => PaymentStatus::Declined,
            (None, true) => PaymentStatus::Pending,
            (None, false) => PaymentStatus::Succeeded,
        };

        let intent = PaymentIntent {
            gateway_id: format!("pi_{:06}", state.next_id),
            amount: request.amount,
            currency: request.currency.clone(),
            status,
            idempotency_key: request.idempotency_key,
            decline_code,
        };
        state
            .intents
            .insert(request.idempotency_key, intent.clone());

        Ok(intent)
    }

    async fn refund(&self, payment_id: &str) -> Result<RefundResult, GatewayError> {
        let mut state = self.state.write().await;
        state.refund_calls += 1;

        if state.transient_refund_failures > 0 {
            state.transient_refund_failures -= 1;
            return Err(GatewayError::Transient("504 Gateway Timeout".to_string()));
        }

        if let Some(existing) = state.refunds.get(payment_id) {
            return Ok(existing.clone());
        }

        let intent = state
            .intents
            .values_mut()
            .find(|intent| intent.gateway_id == payment_id)
            .ok_or_else(|| GatewayError::RefundRejected {
                payment_id: payment_id.to_string(),
                reason: "unknown payment".to_string(),
            })?;

        intent
            .mark_refunded()
            .map_err(|e| GatewayError::RefundRejected {
                payment_id: payment_id.to_string(),
                reason: e.to_string(),
            })?;

        let refund = RefundResult {
            refund_id: format!("re_{payment_id}"),
            payment_id: payment_id.to_string(),
            amount: intent.amount,
        };
        state
            .refunds
            .insert(payment_id.to_string(), refund.clone());

        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: CheckoutAttemptId, method: &str) -> PaymentRequest {
        PaymentRequest {
            amount: Money::from_cents(2000),
            currency: "usd".to_string(),
            payment_method_ref: method.to_string(),
            idempotency_key: key,
        }
    }

    #[tokio::test]
    async fn charge_is_deduplicated_by_idempotency_key() {
        let gateway = InMemoryPaymentGateway::new();
        let key = CheckoutAttemptId::new();

        let first = gateway
            .create_and_confirm_payment(&request(key, "pm_card"))
            .await
            .unwrap();
        let second = gateway
            .create_and_confirm_payment(&request(key, "pm_card"))
            .await
            .unwrap();

        assert_eq!(first.status, PaymentStatus::Succeeded);
        assert_eq!(first, second);
        assert_eq!(gateway.charge_calls().await, 2);
        assert_eq!(gateway.intent_count().await, 1);
    }

    #[tokio::test]
    async fn declined_method_returns_declined_intent() {
        let gateway = InMemoryPaymentGateway::new();
        gateway
            .decline_method("pm_broke", "insufficient_funds")
            .await;

        let intent = gateway
            .create_and_confirm_payment(&request(CheckoutAttemptId::new(), "pm_broke"))
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentStatus::Declined);
        assert_eq!(intent.decline_code.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn refund_is_idempotent_and_requires_success() {
        let gateway = InMemoryPaymentGateway::new();
        let key = CheckoutAttemptId::new();
        let intent = gateway
            .create_and_confirm_payment(&request(key, "pm_card"))
            .await
            .unwrap();

        let first = gateway.refund(&intent.gateway_id).await.unwrap();
        let second = gateway.refund(&intent.gateway_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            gateway.intent_for(key).await.unwrap().status,
            PaymentStatus::Refunded
        );

        let unknown = gateway.refund("pi_missing").await;
        assert!(matches!(unknown, Err(GatewayError::RefundRejected { .. })));
    }

    #[tokio::test]
    async fn declined_payment_cannot_be_refunded() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.decline_method("pm_broke", "card_declined").await;
        let intent = gateway
            .create_and_confirm_payment(&request(CheckoutAttemptId::new(), "pm_broke"))
            .await
            .unwrap();

        let result = gateway.refund(&intent.gateway_id).await;
        assert!(matches!(result, Err(GatewayError::RefundRejected { .. })));
    }

    #[tokio::test]
    async fn injected_transient_failures() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.fail_next_charges(1).await;

        let result = gateway
            .create_and_confirm_payment(&request(CheckoutAttemptId::new(), "pm_card"))
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(gateway.intent_count().await, 0);
    }
}
