//! Synchronous checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::{
    CheckoutError, CheckoutOutcome, CheckoutRequest, CheckoutStatus, Compensation, StaleItem,
};
use serde::Serialize;
use store::CheckoutStore;

use crate::AppState;
use crate::error::checkout_error_status;

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub checkout_attempt_id: String,
    pub status: CheckoutStatus,
    /// Final workflow state.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_items: Option<Vec<StaleItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<Compensation>,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        let state = outcome
            .final_state()
            .map_or("VALIDATING", |state| state.as_str());
        let compensation = outcome.compensation().cloned();

        let (decline_code, stale_items) = match &outcome.error {
            Some(CheckoutError::PaymentDeclined(declined)) => {
                (Some(declined.decline_code.clone()), None)
            }
            Some(CheckoutError::CartStale(stale)) => (None, Some(stale.items.clone())),
            _ => (None, None),
        };

        Self {
            checkout_attempt_id: outcome.checkout_attempt_id.to_string(),
            status: outcome.status,
            state,
            error: outcome.error.as_ref().map(ToString::to_string),
            error_kind: outcome.error.as_ref().map(CheckoutError::kind),
            decline_code,
            stale_items,
            compensation,
        }
    }
}

/// POST /checkout: validate, charge and hand the order to the queue.
///
/// Responds once the order message is enqueued; the order itself is
/// confirmed asynchronously and can be polled by checkout attempt id.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CheckoutRequest>,
) -> (StatusCode, Json<CheckoutResponse>) {
    let outcome = state.orchestrator.checkout(req).await;

    let status = match (&outcome.status, &outcome.error) {
        (CheckoutStatus::Accepted, _) => StatusCode::ACCEPTED,
        (_, Some(err)) => checkout_error_status(err),
        (_, None) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    metrics::counter!("checkout_responses_total", "code" => status.as_u16().to_string())
        .increment(1);

    (status, Json(CheckoutResponse::from(outcome)))
}
