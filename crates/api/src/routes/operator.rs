//! Operator endpoints for dead letters and manual reconciliation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::{ReconciliationId, ReconciliationItem};
use queue::{DeadLetter, MessageId, MessageQueue};
use serde::Deserialize;
use store::CheckoutStore;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

/// GET /operator/dead-letters: messages that exhausted their deliveries.
#[tracing::instrument(skip(state))]
pub async fn dead_letters<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<DeadLetter>>, ApiError> {
    Ok(Json(state.queue.dead_letters().await?))
}

/// POST /operator/dead-letters/:message_id/redrive: put a dead letter back
/// on the queue with a fresh delivery count.
#[tracing::instrument(skip(state))]
pub async fn redrive<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let message_id: MessageId = parse_id(&message_id)?;
    state.queue.redrive(message_id).await?;
    tracing::info!(%message_id, "dead letter redriven");
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct ReconciliationQuery {
    /// `open` (default) or `all`.
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub resolution: String,
}

/// GET /operator/reconciliation?status=open|all: items needing manual
/// settlement, oldest first.
#[tracing::instrument(skip(state, query))]
pub async fn reconciliation<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ReconciliationQuery>,
) -> Result<Json<Vec<ReconciliationItem>>, ApiError> {
    let items = match query.status.as_deref() {
        None | Some("open") => state.reconciliation.open_items().await?,
        Some("all") => state.reconciliation.all_items().await?,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "Invalid reconciliation status filter: {other}"
            )));
        }
    };
    Ok(Json(items))
}

/// POST /operator/reconciliation/:item_id/resolve: close an item once it
/// has been settled by hand.
#[tracing::instrument(skip(state, req))]
pub async fn resolve<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(item_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ReconciliationItem>, ApiError> {
    let item_id: ReconciliationId = parse_id(&item_id)?;
    let resolution = req.resolution.trim();
    if resolution.is_empty() {
        return Err(ApiError::BadRequest(
            "A resolution note is required".to_string(),
        ));
    }

    Ok(Json(state.reconciliation.resolve(item_id, resolution).await?))
}
