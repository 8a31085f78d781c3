//! Payment authorization with bounded retry.

use backon::Retryable;
use common::CheckoutAttemptId;
use domain::{Money, PaymentStatus};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::RetryPolicy;
use crate::error::PaymentDeclinedError;
use crate::services::gateway::{GatewayError, PaymentGateway, PaymentRequest};

/// A captured charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedPayment {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount_captured: Money,
}

/// Charges the customer through the gateway.
///
/// Transient gateway failures are retried with exponential backoff, always
/// with the same idempotency key. Declines are never retried.
pub struct PaymentAuthorizer<G: PaymentGateway> {
    gateway: G,
    policy: RetryPolicy,
}

impl<G: PaymentGateway> PaymentAuthorizer<G> {
    pub fn new(gateway: G, policy: RetryPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    #[tracing::instrument(skip(self, payment_method_ref), fields(amount = %amount))]
    pub async fn authorize(
        &self,
        amount: Money,
        currency: &str,
        payment_method_ref: &str,
        idempotency_key: CheckoutAttemptId,
    ) -> Result<AuthorizedPayment> {
        let request = PaymentRequest {
            amount,
            currency: currency.to_string(),
            payment_method_ref: payment_method_ref.to_string(),
            idempotency_key,
        };

        let intent = (|| async {
            metrics::counter!("payment_attempts_total").increment(1);
            self.gateway.create_and_confirm_payment(&request).await
        })
        .retry(self.policy.backoff())
        .sleep(tokio::time::sleep)
        .when(GatewayError::is_transient)
        .notify(|err, dur| {
            tracing::warn!(error = %err, ?dur, "Payment gateway failed, retrying");
        })
        .await?;

        match intent.status {
            PaymentStatus::Succeeded => Ok(AuthorizedPayment {
                payment_id: intent.gateway_id,
                status: intent.status,
                amount_captured: intent.amount,
            }),
            PaymentStatus::Declined => {
                let decline_code = intent
                    .decline_code
                    .unwrap_or_else(|| "unspecified".to_string());
                tracing::warn!(%decline_code, "Payment declined");
                Err(PaymentDeclinedError {
                    decline_code,
                    payment_id: intent.gateway_id,
                }
                .into())
            }
            status => Err(GatewayError::UnexpectedStatus {
                payment_id: intent.gateway_id,
                status,
            }
            .into()),
        }
    }
}
