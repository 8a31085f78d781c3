//! Alerting front of the durable reconciliation list.

use domain::{ReconciliationId, ReconciliationItem, ReconciliationKind};
use store::ReconciliationStore;

use crate::Result;

/// Raises, lists and resolves reconciliation items in a store.
///
/// At most one item per kind and checkout attempt: raising the same problem
/// again (a redelivered message) keeps the first item.
#[derive(Clone)]
pub struct ReconciliationLog<S: ReconciliationStore> {
    store: S,
}

impl<S: ReconciliationStore> ReconciliationLog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Records an item and alerts. Returns false if it was already recorded.
    pub async fn raise(&self, item: ReconciliationItem) -> Result<bool> {
        if !self.store.raise_item(&item).await? {
            tracing::debug!(
                kind = %item.kind,
                checkout_attempt_id = %item.checkout_attempt_id,
                "Reconciliation item already recorded"
            );
            return Ok(false);
        }

        tracing::error!(
            item_id = %item.item_id,
            kind = %item.kind,
            checkout_attempt_id = %item.checkout_attempt_id,
            order_id = ?item.order_id,
            payment_id = ?item.payment_id,
            detail = %item.detail,
            "Manual reconciliation required"
        );
        metrics::counter!("reconciliation_items_total", "kind" => item.kind.as_str()).increment(1);
        Ok(true)
    }

    /// Raises an item where the caller cannot propagate a failure.
    ///
    /// A store failure is logged with the full item so the alert survives in
    /// the logs.
    pub async fn raise_or_log(&self, item: ReconciliationItem) {
        if let Err(err) = self.raise(item.clone()).await {
            tracing::error!(
                error = %err,
                kind = %item.kind,
                checkout_attempt_id = %item.checkout_attempt_id,
                order_id = ?item.order_id,
                payment_id = ?item.payment_id,
                detail = %item.detail,
                "Manual reconciliation required, item could not be stored"
            );
            metrics::counter!("reconciliation_store_failures_total").increment(1);
        }
    }

    pub async fn open_items(&self) -> Result<Vec<ReconciliationItem>> {
        Ok(self.store.list_items(true).await?)
    }

    pub async fn all_items(&self) -> Result<Vec<ReconciliationItem>> {
        Ok(self.store.list_items(false).await?)
    }

    pub async fn open_items_of_kind(
        &self,
        kind: ReconciliationKind,
    ) -> Result<Vec<ReconciliationItem>> {
        let mut items = self.open_items().await?;
        items.retain(|item| item.kind == kind);
        Ok(items)
    }

    /// Closes an item once an operator has settled it.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        item_id: ReconciliationId,
        resolution: &str,
    ) -> Result<ReconciliationItem> {
        let item = self.store.resolve_item(item_id, resolution).await?;
        tracing::info!(kind = %item.kind, checkout_attempt_id = %item.checkout_attempt_id, "Reconciliation item resolved");
        metrics::counter!("reconciliation_resolved_total", "kind" => item.kind.as_str()).increment(1);
        Ok(item)
    }
}
