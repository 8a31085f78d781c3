use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutAttemptId, OrderId, UserId};
use domain::{
    Cart, Money, Order, OrderStatus, ProductId, ReconciliationId, ReconciliationItem,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Live catalog data for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub product_id: ProductId,
    pub price: Money,
    pub stock: u32,
}

/// Read-only price and stock lookup.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Returns the live price and stock of a product, or `None` if it is not
    /// sold any more.
    async fn get_item(&self, product_id: &ProductId) -> Result<Option<CatalogItem>>;
}

/// Cart persistence, keyed by user.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, user_id: &UserId) -> Result<Option<Cart>>;

    /// Replaces the stored cart of `cart.user_id`.
    async fn put_cart(&self, cart: &Cart) -> Result<()>;

    /// Deletes the cart. Returns false if there was none, which is not an
    /// error: a redelivered message may delete the same cart twice.
    async fn delete_cart(&self, user_id: &UserId) -> Result<bool>;
}

/// Outcome of a conditional inventory decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecrementOutcome {
    /// Stock was taken; `remaining` is the stock left after the decrement.
    Decremented { remaining: u32 },

    /// Taking `requested` units would have made the stock negative.
    Insufficient { requested: u32, available: u32 },
}

impl DecrementOutcome {
    pub fn is_decremented(&self) -> bool {
        matches!(self, DecrementOutcome::Decremented { .. })
    }
}

/// Inventory counters.
///
/// Stock never goes negative: the decrement is one conditional storage
/// operation, never a read followed by a write.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<u32>>;

    /// Sets the absolute stock level of a product (restock).
    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<()>;

    /// Takes `quantity` units of `product_id` for `order_id`, only if the
    /// resulting stock stays non-negative.
    ///
    /// The outcome is recorded in a ledger keyed by `(order_id, product_id)`
    /// in the same atomic operation, so a replay for the same order returns
    /// the recorded outcome without touching the stock again.
    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome>;
}

/// Dedup guard: maps a checkout attempt to the single order created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub checkout_attempt_id: CheckoutAttemptId,
    pub order_id: OrderId,
    /// Set once every materialization step has run.
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of the atomic check-and-insert of an order.
#[derive(Debug, Clone)]
pub enum CreateOrderOutcome {
    /// The idempotency record and the order were inserted together.
    Created(Order),

    /// An order already exists for the checkout attempt.
    Existing {
        record: IdempotencyRecord,
        order: Order,
    },
}

/// Order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the idempotency record and the order in one conditional write.
    ///
    /// If a record already exists for `order.checkout_attempt_id`, nothing is
    /// written and the existing record and order are returned.
    async fn create_order_once(&self, order: &Order) -> Result<CreateOrderOutcome>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn find_by_checkout_attempt(
        &self,
        checkout_attempt_id: CheckoutAttemptId,
    ) -> Result<Option<Order>>;

    /// Moves an order from `expected` to `next` if it is still in `expected`.
    ///
    /// Fails with `StatusConflict` if another writer moved it first and with
    /// `Domain` if the transition is not allowed.
    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order>;

    /// Marks the idempotency record of a checkout attempt as completed.
    async fn mark_completed(&self, checkout_attempt_id: CheckoutAttemptId) -> Result<()>;

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
}

/// Durable list of problems awaiting an operator.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Records an open item unless one of the same kind already exists for
    /// the checkout attempt. Returns false when nothing was written.
    async fn raise_item(&self, item: &ReconciliationItem) -> Result<bool>;

    /// Lists items oldest first, resolved ones included unless `open_only`.
    async fn list_items(&self, open_only: bool) -> Result<Vec<ReconciliationItem>>;

    /// Closes an open item with an operator note.
    ///
    /// Fails with `NotFound` for an unknown id and `AlreadyResolved` when
    /// the item was closed before.
    async fn resolve_item(
        &self,
        item_id: ReconciliationId,
        resolution: &str,
    ) -> Result<ReconciliationItem>;
}

/// Every store the checkout pipeline needs, behind one handle.
pub trait CheckoutStore:
    CatalogStore + CartStore + InventoryStore + OrderStore + ReconciliationStore + Clone + 'static
{
}

impl<T> CheckoutStore for T where
    T: CatalogStore
        + CartStore
        + InventoryStore
        + OrderStore
        + ReconciliationStore
        + Clone
        + 'static
{
}

/// Checks a transition against the domain table before any write happens.
pub(crate) fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(domain::DomainError::InvalidStatusTransition { from, to }.into())
    }
}
