use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CheckoutAttemptId, OrderId, UserId};
use domain::{
    Cart, Money, Order, OrderStatus, ProductId, ReconciliationId, ReconciliationItem,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        CartStore, CatalogItem, CatalogStore, CreateOrderOutcome, DecrementOutcome,
        IdempotencyRecord, InventoryStore, OrderStore, ReconciliationStore, validate_transition,
    },
};

/// Remaining injected failures per operation family.
#[derive(Debug, Default)]
struct Faults {
    catalog_reads: u32,
    order_writes: u32,
    reconciliation_writes: u32,
    inventory_writes: u32,
    cart_deletes: u32,
}

fn take_fault(counter: &mut u32, operation: &str) -> Result<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(StoreError::Unavailable(format!(
            "injected failure during {operation}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct InMemoryState {
    prices: HashMap<ProductId, Money>,
    stock: HashMap<ProductId, u32>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
    idempotency: HashMap<CheckoutAttemptId, IdempotencyRecord>,
    ledger: HashMap<(OrderId, ProductId), DecrementOutcome>,
    reconciliation: Vec<ReconciliationItem>,
    decrement_writes: u64,
    faults: Faults,
}

/// In-memory implementation of every store, for tests and the default server.
///
/// Each operation runs under a single write lock, which gives it the same
/// atomicity the PostgreSQL statements provide.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product to the catalog with its price and stock.
    pub async fn seed_product(&self, product_id: impl Into<ProductId>, price: Money, stock: u32) {
        let product_id = product_id.into();
        let mut state = self.state.write().await;
        state.prices.insert(product_id.clone(), price);
        state.stock.insert(product_id, stock);
    }

    /// Changes the live price of a product.
    pub async fn set_price(&self, product_id: impl Into<ProductId>, price: Money) {
        self.state
            .write()
            .await
            .prices
            .insert(product_id.into(), price);
    }

    /// Makes the next `n` catalog reads fail with `Unavailable`.
    pub async fn fail_next_catalog_reads(&self, n: u32) {
        self.state.write().await.faults.catalog_reads = n;
    }

    /// Makes the next `n` order writes fail with `Unavailable`.
    pub async fn fail_next_order_writes(&self, n: u32) {
        self.state.write().await.faults.order_writes = n;
    }

    /// Makes the next `n` reconciliation writes fail with `Unavailable`.
    pub async fn fail_next_reconciliation_writes(&self, n: u32) {
        self.state.write().await.faults.reconciliation_writes = n;
    }

    /// Makes the next `n` inventory decrements fail with `Unavailable`.
    pub async fn fail_next_inventory_writes(&self, n: u32) {
        self.state.write().await.faults.inventory_writes = n;
    }

    /// Makes the next `n` cart deletions fail with `Unavailable`.
    pub async fn fail_next_cart_deletes(&self, n: u32) {
        self.state.write().await.faults.cart_deletes = n;
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns how many decrements actually changed a stock counter.
    pub async fn decrement_writes(&self) -> u64 {
        self.state.read().await.decrement_writes
    }

    /// Returns the idempotency record of a checkout attempt, if any.
    pub async fn idempotency_record(
        &self,
        checkout_attempt_id: CheckoutAttemptId,
    ) -> Option<IdempotencyRecord> {
        self.state
            .read()
            .await
            .idempotency
            .get(&checkout_attempt_id)
            .cloned()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_item(&self, product_id: &ProductId) -> Result<Option<CatalogItem>> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.catalog_reads, "catalog read")?;

        Ok(state.prices.get(product_id).map(|price| CatalogItem {
            product_id: product_id.clone(),
            price: *price,
            stock: state.stock.get(product_id).copied().unwrap_or(0),
        }))
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_cart(&self, user_id: &UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(user_id).cloned())
    }

    async fn put_cart(&self, cart: &Cart) -> Result<()> {
        self.state
            .write()
            .await
            .carts
            .insert(cart.user_id.clone(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, user_id: &UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.cart_deletes, "cart delete")?;
        Ok(state.carts.remove(user_id).is_some())
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<u32>> {
        Ok(self.state.read().await.stock.get(product_id).copied())
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<()> {
        self.state
            .write()
            .await
            .stock
            .insert(product_id.clone(), stock);
        Ok(())
    }

    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.inventory_writes, "inventory decrement")?;

        let key = (order_id, product_id.clone());
        if let Some(recorded) = state.ledger.get(&key) {
            return Ok(*recorded);
        }

        let available = state.stock.get(product_id).copied().unwrap_or(0);
        let outcome = match available.checked_sub(quantity) {
            Some(remaining) => {
                state.stock.insert(product_id.clone(), remaining);
                state.decrement_writes += 1;
                DecrementOutcome::Decremented { remaining }
            }
            None => DecrementOutcome::Insufficient {
                requested: quantity,
                available,
            },
        };
        state.ledger.insert(key, outcome);
        Ok(outcome)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order_once(&self, order: &Order) -> Result<CreateOrderOutcome> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.order_writes, "order create")?;

        if let Some(record) = state.idempotency.get(&order.checkout_attempt_id) {
            let record = record.clone();
            let existing = state
                .orders
                .get(&record.order_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    entity: "Order",
                    id: record.order_id.to_string(),
                })?;
            return Ok(CreateOrderOutcome::Existing {
                record,
                order: existing,
            });
        }

        state.idempotency.insert(
            order.checkout_attempt_id,
            IdempotencyRecord {
                checkout_attempt_id: order.checkout_attempt_id,
                order_id: order.order_id,
                completed: false,
                created_at: Utc::now(),
            },
        );
        state.orders.insert(order.order_id, order.clone());
        Ok(CreateOrderOutcome::Created(order.clone()))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_by_checkout_attempt(
        &self,
        checkout_attempt_id: CheckoutAttemptId,
    ) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency
            .get(&checkout_attempt_id)
            .and_then(|record| state.orders.get(&record.order_id))
            .cloned())
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        validate_transition(expected, next)?;

        let mut state = self.state.write().await;
        take_fault(&mut state.faults.order_writes, "order status update")?;

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Order",
                id: order_id.to_string(),
            })?;

        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual: order.status,
            });
        }

        order.transition_to(next)?;
        Ok(order.clone())
    }

    async fn mark_completed(&self, checkout_attempt_id: CheckoutAttemptId) -> Result<()> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.order_writes, "idempotency completion")?;

        let record = state
            .idempotency
            .get_mut(&checkout_attempt_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "IdempotencyRecord",
                id: checkout_attempt_id.to_string(),
            })?;
        record.completed = true;
        Ok(())
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn raise_item(&self, item: &ReconciliationItem) -> Result<bool> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.reconciliation_writes, "reconciliation raise")?;

        if state.reconciliation.iter().any(|existing| {
            existing.kind == item.kind && existing.checkout_attempt_id == item.checkout_attempt_id
        }) {
            return Ok(false);
        }

        state.reconciliation.push(item.clone());
        Ok(true)
    }

    async fn list_items(&self, open_only: bool) -> Result<Vec<ReconciliationItem>> {
        let state = self.state.read().await;
        let mut items: Vec<ReconciliationItem> = state
            .reconciliation
            .iter()
            .filter(|item| !open_only || item.is_open())
            .cloned()
            .collect();
        items.sort_by_key(|item| item.raised_at);
        Ok(items)
    }

    async fn resolve_item(
        &self,
        item_id: ReconciliationId,
        resolution: &str,
    ) -> Result<ReconciliationItem> {
        let mut state = self.state.write().await;
        take_fault(&mut state.faults.reconciliation_writes, "reconciliation resolve")?;

        let item = state
            .reconciliation
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "ReconciliationItem",
                id: item_id.to_string(),
            })?;

        if !item.is_open() {
            return Err(StoreError::AlreadyResolved(item_id));
        }

        item.resolve(resolution);
        Ok(item.clone())
    }
}
