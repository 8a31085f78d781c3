//! Checkout workflow state machine.

use common::OrderId;
use domain::Money;
use queue::MessageId;
use serde::{Deserialize, Serialize};

/// Why a workflow ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStep {
    Validation,
    Payment,
    Enqueue,
    Timeout,
}

/// What was done about a charge when the workflow failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    /// Nothing was charged.
    NotNeeded,
    Refunded { refund_id: String },
    /// An order already exists for the attempt, so the charge stands.
    SkippedOrderExists { order_id: OrderId },
    /// Every refund attempt failed; an operator has to settle it.
    RefundFailed,
    /// The charge may or may not have happened; an operator has to check.
    ChargeOutcomeUnknown,
}

/// The state of one checkout workflow.
///
/// State transitions:
/// ```text
/// Validating ──► Authorizing ──► Enqueueing ──► Completed
///     │              │               │
///     └──────────────┴───────────────┴────────► Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Validating,
    Authorizing {
        amount: Money,
    },
    Enqueueing {
        payment_id: String,
        amount_captured: Money,
    },
    Completed {
        message_id: MessageId,
    },
    Failed {
        step: FailureStep,
        compensation: Compensation,
    },
}

impl WorkflowState {
    /// Returns true if the workflow may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &WorkflowState) -> bool {
        use WorkflowState::*;

        matches!(
            (self, next),
            (Validating, Authorizing { .. })
                | (Authorizing { .. }, Enqueueing { .. })
                | (Enqueueing { .. }, Completed { .. })
                | (Validating | Authorizing { .. } | Enqueueing { .. }, Failed { .. })
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed { .. } | WorkflowState::Failed { .. }
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Validating => "VALIDATING",
            WorkflowState::Authorizing { .. } => "AUTHORIZING",
            WorkflowState::Enqueueing { .. } => "ENQUEUEING",
            WorkflowState::Completed { .. } => "COMPLETED",
            WorkflowState::Failed { .. } => "FAILED",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
