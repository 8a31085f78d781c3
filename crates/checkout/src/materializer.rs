//! Idempotent order materialization from queued messages.

use async_trait::async_trait;
use common::OrderId;
use domain::{
    Order, OrderMessage, OrderNotification, OrderNotificationData, OrderPartiallyFailedData,
    OrderStatus, ReconciliationItem, ReconciliationKind,
};
use queue::{Delivery, MessageHandler};
use store::{CheckoutStore, CreateOrderOutcome, DecrementOutcome, StoreError};

use crate::Result;
use crate::error::{CheckoutError, InventoryConflictError};
use crate::reconciliation::ReconciliationLog;
use crate::services::notification::NotificationSender;

/// What handling one order message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// Order created and every item taken from inventory.
    Completed { order_id: OrderId },

    /// Order created but some items are short; it needs reconciliation.
    PartiallyFailed {
        order_id: OrderId,
        conflicts: Vec<InventoryConflictError>,
    },

    /// The message was already fully processed.
    DuplicateNoop { order_id: OrderId },
}

impl MaterializeOutcome {
    pub fn order_id(&self) -> OrderId {
        match self {
            MaterializeOutcome::Completed { order_id }
            | MaterializeOutcome::PartiallyFailed { order_id, .. }
            | MaterializeOutcome::DuplicateNoop { order_id } => *order_id,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            MaterializeOutcome::Completed { .. } => "completed",
            MaterializeOutcome::PartiallyFailed { .. } => "partially_failed",
            MaterializeOutcome::DuplicateNoop { .. } => "duplicate",
        }
    }
}

/// Turns an order message into a durable order, at most once per checkout
/// attempt.
///
/// Correctness under duplicate and concurrent delivery rests on the store's
/// conditional order insert and its per-order inventory ledger. No locks are
/// taken here.
pub struct OrderMaterializer<S: CheckoutStore> {
    store: S,
    notifications: NotificationSender,
    reconciliation: ReconciliationLog<S>,
}

impl<S: CheckoutStore> OrderMaterializer<S> {
    pub fn new(store: S, notifications: NotificationSender) -> Self {
        Self {
            reconciliation: ReconciliationLog::new(store.clone()),
            store,
            notifications,
        }
    }

    /// Materializes one message.
    ///
    /// A storage error leaves the work unfinished and is returned, so the
    /// message is redelivered and the remaining steps run again.
    #[tracing::instrument(skip(self, message), fields(checkout_attempt_id = %message.checkout_attempt_id))]
    pub async fn materialize(&self, message: &OrderMessage) -> Result<MaterializeOutcome> {
        let order = match self
            .store
            .create_order_once(&Order::from_message(message))
            .await?
        {
            CreateOrderOutcome::Created(order) => {
                tracing::info!(order_id = %order.order_id, "Order created");
                order
            }
            CreateOrderOutcome::Existing { record, order } if record.completed => {
                metrics::counter!("duplicate_deliveries_total").increment(1);
                tracing::info!(order_id = %order.order_id, "Duplicate delivery, already materialized");
                return Ok(MaterializeOutcome::DuplicateNoop {
                    order_id: order.order_id,
                });
            }
            CreateOrderOutcome::Existing { order, .. } => {
                tracing::info!(order_id = %order.order_id, "Resuming unfinished materialization");
                order
            }
        };

        let conflicts = self.take_inventory(&order).await?;

        let outcome = if conflicts.is_empty() {
            MaterializeOutcome::Completed {
                order_id: order.order_id,
            }
        } else {
            self.mark_partially_failed(&order, &conflicts).await?;
            MaterializeOutcome::PartiallyFailed {
                order_id: order.order_id,
                conflicts,
            }
        };

        self.store.delete_cart(&order.user_id).await?;
        self.store.mark_completed(order.checkout_attempt_id).await?;

        self.notifications.send(notification_for(&order, &outcome));
        metrics::counter!("orders_materialized_total", "outcome" => outcome.as_str()).increment(1);

        Ok(outcome)
    }

    /// Takes every item from inventory; a shortfall never fails the others.
    async fn take_inventory(&self, order: &Order) -> Result<Vec<InventoryConflictError>> {
        let mut conflicts = Vec::new();

        for item in &order.items {
            let outcome = self
                .store
                .decrement_for_order(order.order_id, &item.product_id, item.quantity)
                .await?;

            if let DecrementOutcome::Insufficient {
                requested,
                available,
            } = outcome
            {
                let conflict = InventoryConflictError {
                    product_id: item.product_id.clone(),
                    requested,
                    available,
                };
                tracing::warn!(order_id = %order.order_id, %conflict, "Inventory conflict");
                metrics::counter!("inventory_conflicts_total").increment(1);
                conflicts.push(conflict);
            }
        }

        Ok(conflicts)
    }

    async fn mark_partially_failed(
        &self,
        order: &Order,
        conflicts: &[InventoryConflictError],
    ) -> Result<()> {
        if order.status == OrderStatus::Processing {
            match self
                .store
                .update_status(
                    order.order_id,
                    OrderStatus::Processing,
                    OrderStatus::PartiallyFailed,
                )
                .await
            {
                Ok(_) => {}
                // A concurrent redelivery got there first
                Err(StoreError::StatusConflict {
                    actual: OrderStatus::PartiallyFailed,
                    ..
                }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let detail = conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        self.reconciliation
            .raise(
                ReconciliationItem::new(
                    ReconciliationKind::PartiallyFailedOrder,
                    order.checkout_attempt_id,
                    detail,
                )
                .with_order(order.order_id)
                .with_payment(order.payment_id.clone()),
            )
            .await?;

        Ok(())
    }
}

fn notification_for(order: &Order, outcome: &MaterializeOutcome) -> OrderNotification {
    match outcome {
        MaterializeOutcome::PartiallyFailed { conflicts, .. } => {
            OrderNotification::OrderPartiallyFailed(OrderPartiallyFailedData {
                order_id: order.order_id,
                checkout_attempt_id: order.checkout_attempt_id,
                user_id: order.user_id.clone(),
                short_items: conflicts
                    .iter()
                    .map(|conflict| conflict.product_id.clone())
                    .collect(),
            })
        }
        _ => OrderNotification::OrderConfirmed(OrderNotificationData {
            order_id: order.order_id,
            checkout_attempt_id: order.checkout_attempt_id,
            user_id: order.user_id.clone(),
            total_amount: order.total_amount,
        }),
    }
}

#[async_trait]
impl<S: CheckoutStore> MessageHandler<OrderMessage> for OrderMaterializer<S> {
    type Error = CheckoutError;

    async fn handle(&self, delivery: &Delivery<OrderMessage>) -> Result<()> {
        self.materialize(&delivery.payload).await.map(|_| ())
    }
}
