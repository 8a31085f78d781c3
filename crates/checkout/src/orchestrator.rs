//! Checkout workflow orchestrator.

use backon::Retryable;
use chrono::Utc;
use common::{CheckoutAttemptId, UserId};
use domain::{OrderMessage, ReconciliationItem, ReconciliationKind, ShippingAddress};
use queue::{MessageId, MessageQueue};
use serde::{Deserialize, Serialize};
use store::CheckoutStore;
use tokio::time::{Instant, timeout_at};

use crate::authorizer::PaymentAuthorizer;
use crate::config::CheckoutConfig;
use crate::error::CheckoutError;
use crate::publisher::QueuePublisher;
use crate::reconciliation::ReconciliationLog;
use crate::services::gateway::{GatewayError, PaymentGateway};
use crate::state::{Compensation, FailureStep, WorkflowState};
use crate::validator::{CartValidator, ValidatedCart};

/// Input of one checkout call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub payment_method_ref: String,
    pub shipping_address: ShippingAddress,
}

/// Caller-facing result of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStatus {
    /// Payment captured and the order handed to the queue.
    Accepted,
    Declined,
    Error,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Accepted => "ACCEPTED",
            CheckoutStatus::Declined => "DECLINED",
            CheckoutStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one checkout workflow.
#[derive(Debug)]
pub struct CheckoutOutcome {
    pub checkout_attempt_id: CheckoutAttemptId,
    pub status: CheckoutStatus,
    /// The error that ended the workflow, for anything but `Accepted`.
    pub error: Option<CheckoutError>,
    /// Every state the workflow went through, in order.
    pub history: Vec<WorkflowState>,
}

impl CheckoutOutcome {
    pub fn final_state(&self) -> Option<&WorkflowState> {
        self.history.last()
    }

    /// The compensation applied when the workflow failed.
    pub fn compensation(&self) -> Option<&Compensation> {
        match self.final_state() {
            Some(WorkflowState::Failed { compensation, .. }) => Some(compensation),
            _ => None,
        }
    }
}

struct Failure {
    step: FailureStep,
    compensation: Compensation,
    error: CheckoutError,
}

impl Failure {
    fn new(step: FailureStep, compensation: Compensation, error: CheckoutError) -> Self {
        Self {
            step,
            compensation,
            error,
        }
    }
}

struct WorkflowRun {
    checkout_attempt_id: CheckoutAttemptId,
    history: Vec<WorkflowState>,
}

impl WorkflowRun {
    fn new(checkout_attempt_id: CheckoutAttemptId) -> Self {
        Self {
            checkout_attempt_id,
            history: vec![WorkflowState::Validating],
        }
    }

    fn current(&self) -> &WorkflowState {
        // history always starts with Validating
        &self.history[self.history.len() - 1]
    }

    fn advance(&mut self, next: WorkflowState) {
        debug_assert!(
            self.current().can_transition_to(&next),
            "invalid workflow transition {} -> {}",
            self.current(),
            next
        );
        tracing::info!(
            checkout_attempt_id = %self.checkout_attempt_id,
            from = %self.current(),
            to = %next,
            "Workflow state changed"
        );
        self.history.push(next);
    }
}

/// Drives one checkout through `Validating → Authorizing → Enqueueing`.
///
/// Compensation lives here and only here: a captured charge is refunded when
/// the order message cannot be handed to the queue in time.
pub struct WorkflowOrchestrator<S, G, Q>
where
    S: CheckoutStore,
    G: PaymentGateway,
    Q: MessageQueue<Message = OrderMessage>,
{
    store: S,
    validator: CartValidator<S>,
    authorizer: PaymentAuthorizer<G>,
    publisher: QueuePublisher<Q>,
    reconciliation: ReconciliationLog<S>,
    config: CheckoutConfig,
}

impl<S, G, Q> WorkflowOrchestrator<S, G, Q>
where
    S: CheckoutStore,
    G: PaymentGateway,
    Q: MessageQueue<Message = OrderMessage>,
{
    pub fn new(
        store: S,
        gateway: G,
        queue: Q,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            validator: CartValidator::new(store.clone()),
            reconciliation: ReconciliationLog::new(store.clone()),
            authorizer: PaymentAuthorizer::new(gateway, config.payment_retry),
            publisher: QueuePublisher::new(queue, config.enqueue_retry),
            store,
            config,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Runs one checkout to a terminal state.
    ///
    /// Never returns an error: failures are reported on the outcome with the
    /// state trajectory that led to them.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, checkout_attempt_id = tracing::field::Empty))]
    pub async fn checkout(&self, request: CheckoutRequest) -> CheckoutOutcome {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = std::time::Instant::now();

        let checkout_attempt_id = CheckoutAttemptId::new();
        tracing::Span::current().record(
            "checkout_attempt_id",
            tracing::field::display(checkout_attempt_id),
        );

        let deadline = Instant::now() + self.config.workflow_timeout;
        let mut run = WorkflowRun::new(checkout_attempt_id);

        let (status, error) = match self.drive(&mut run, &request, deadline).await {
            Ok(message_id) => {
                run.advance(WorkflowState::Completed { message_id });
                (CheckoutStatus::Accepted, None)
            }
            Err(failure) => {
                let status = match failure.error {
                    CheckoutError::PaymentDeclined(_) => CheckoutStatus::Declined,
                    _ => CheckoutStatus::Error,
                };
                tracing::warn!(
                    step = ?failure.step,
                    compensation = ?failure.compensation,
                    error = %failure.error,
                    "Checkout failed"
                );
                run.advance(WorkflowState::Failed {
                    step: failure.step,
                    compensation: failure.compensation,
                });
                (status, Some(failure.error))
            }
        };

        metrics::counter!("checkout_outcomes_total", "status" => status.as_str()).increment(1);
        metrics::histogram!("workflow_duration_seconds").record(started.elapsed().as_secs_f64());

        CheckoutOutcome {
            checkout_attempt_id,
            status,
            error,
            history: run.history,
        }
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        request: &CheckoutRequest,
        deadline: Instant,
    ) -> Result<MessageId, Failure> {
        let checkout_attempt_id = run.checkout_attempt_id;

        // VALIDATING
        let validated = match timeout_at(deadline, self.load_and_validate(&request.user_id)).await
        {
            Ok(Ok(validated)) => validated,
            Ok(Err(error)) => {
                return Err(Failure::new(
                    FailureStep::Validation,
                    Compensation::NotNeeded,
                    error,
                ));
            }
            Err(_) => {
                return Err(Failure::new(
                    FailureStep::Timeout,
                    Compensation::NotNeeded,
                    CheckoutError::Timeout { step: "VALIDATING" },
                ));
            }
        };
        run.advance(WorkflowState::Authorizing {
            amount: validated.total,
        });

        // AUTHORIZING
        let authorize = self.authorizer.authorize(
            validated.total,
            &self.config.currency,
            &request.payment_method_ref,
            checkout_attempt_id,
        );
        let payment = match timeout_at(deadline, authorize).await {
            Ok(Ok(payment)) => payment,
            Ok(Err(error)) => {
                return Err(Failure::new(
                    FailureStep::Payment,
                    Compensation::NotNeeded,
                    error,
                ));
            }
            Err(_) => {
                self.reconciliation
                    .raise_or_log(ReconciliationItem::new(
                        ReconciliationKind::ChargeOutcomeUnknown,
                        checkout_attempt_id,
                        "workflow deadline passed while the charge was in flight; \
                         look the charge up by idempotency key",
                    ))
                    .await;
                return Err(Failure::new(
                    FailureStep::Timeout,
                    Compensation::ChargeOutcomeUnknown,
                    CheckoutError::Timeout {
                        step: "AUTHORIZING",
                    },
                ));
            }
        };
        run.advance(WorkflowState::Enqueueing {
            payment_id: payment.payment_id.clone(),
            amount_captured: payment.amount_captured,
        });

        // ENQUEUEING
        let ValidatedCart { items, total } = validated;
        let message = OrderMessage {
            checkout_attempt_id,
            user_id: request.user_id.clone(),
            items,
            payment_id: payment.payment_id.clone(),
            total_amount: total,
            shipping_address: request.shipping_address.clone(),
            created_at: Utc::now(),
        };

        let (step, error) = match timeout_at(deadline, self.publisher.publish(&message)).await {
            Ok(Ok(message_id)) => return Ok(message_id),
            Ok(Err(error)) => (FailureStep::Enqueue, error),
            Err(_) => (
                FailureStep::Timeout,
                CheckoutError::Timeout { step: "ENQUEUEING" },
            ),
        };

        let compensation = self
            .compensate(checkout_attempt_id, &payment.payment_id)
            .await;

        // A publish cut off by the deadline may still have landed, and its
        // order would then be materialized against a compensated charge.
        if step == FailureStep::Timeout {
            self.reconciliation
                .raise_or_log(
                    ReconciliationItem::new(
                        ReconciliationKind::EnqueueOutcomeUnknown,
                        checkout_attempt_id,
                        format!(
                            "workflow deadline passed while publishing the order message; \
                             compensation: {compensation:?}"
                        ),
                    )
                    .with_payment(payment.payment_id.clone()),
                )
                .await;
        }

        Err(Failure::new(step, compensation, error))
    }

    async fn load_and_validate(&self, user_id: &UserId) -> crate::Result<ValidatedCart> {
        let cart = self
            .store
            .get_cart(user_id)
            .await?
            .ok_or_else(|| CheckoutError::EmptyCart(user_id.clone()))?;
        self.validator.validate(&cart).await
    }

    /// Refunds a captured charge that never made it to the queue.
    ///
    /// Runs outside the workflow deadline.
    #[tracing::instrument(skip(self))]
    async fn compensate(
        &self,
        checkout_attempt_id: CheckoutAttemptId,
        payment_id: &str,
    ) -> Compensation {
        match self.store.find_by_checkout_attempt(checkout_attempt_id).await {
            Ok(Some(order)) => {
                tracing::warn!(order_id = %order.order_id, "Order already materialized, refund skipped");
                return Compensation::SkippedOrderExists {
                    order_id: order.order_id,
                };
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Could not look up an existing order, refunding");
            }
        }

        let gateway = self.authorizer.gateway();
        let result = (|| async { gateway.refund(payment_id).await })
            .retry(self.config.refund_retry.backoff())
            .sleep(tokio::time::sleep)
            .when(GatewayError::is_transient)
            .notify(|err, dur| {
                tracing::warn!(error = %err, ?dur, "Refund failed, retrying");
            })
            .await;

        match result {
            Ok(refund) => {
                metrics::counter!("refunds_total", "result" => "succeeded").increment(1);
                tracing::info!(refund_id = %refund.refund_id, "Charge refunded");
                Compensation::Refunded {
                    refund_id: refund.refund_id,
                }
            }
            Err(err) => {
                metrics::counter!("refunds_total", "result" => "failed").increment(1);
                self.reconciliation
                    .raise_or_log(
                        ReconciliationItem::new(
                            ReconciliationKind::RefundFailed,
                            checkout_attempt_id,
                            format!("refund failed after retries: {err}"),
                        )
                        .with_payment(payment_id),
                    )
                    .await;
                Compensation::RefundFailed
            }
        }
    }
}
