//! Cart validation against the live catalog.

use domain::{Cart, CartItem, DomainError, Money, OrderItem};
use store::CatalogStore;

use crate::Result;
use crate::error::{CartStaleError, CheckoutError, StaleItem, StaleReason};

/// A cart that matches the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    /// One line per product, in first-seen cart order.
    pub items: Vec<OrderItem>,
    /// Σ unit price × quantity of `items`.
    pub total: Money,
}

/// Checks a cart snapshot against live catalog prices and stock.
///
/// Pure read: nothing is reserved or written.
pub struct CartValidator<C: CatalogStore> {
    catalog: C,
}

impl<C: CatalogStore> CartValidator<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// Validates every item and reports all stale ones together.
    #[tracing::instrument(skip(self, cart), fields(user_id = %cart.user_id, items = cart.items.len()))]
    pub async fn validate(&self, cart: &Cart) -> Result<ValidatedCart> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart(cart.user_id.clone()));
        }

        let lines = normalize(&cart.items);
        let mut stale = Vec::new();

        for line in &lines {
            let mut reasons = Vec::new();

            if line.quantity == 0 {
                reasons.push(StaleReason::InvalidQuantity);
            }

            match self.catalog.get_item(&line.product_id).await? {
                None => reasons.push(StaleReason::ProductUnavailable),
                Some(live) => {
                    if live.price != line.unit_price {
                        reasons.push(StaleReason::PriceChanged {
                            snapshot_price: line.unit_price,
                            live_price: live.price,
                        });
                    }
                    if live.stock < line.quantity {
                        reasons.push(StaleReason::InsufficientStock {
                            requested: line.quantity,
                            available: live.stock,
                        });
                    }
                }
            }

            if !reasons.is_empty() {
                stale.push(StaleItem {
                    product_id: line.product_id.clone(),
                    reasons,
                });
            }
        }

        if !stale.is_empty() {
            tracing::info!(stale_items = stale.len(), "Cart is stale");
            return Err(CartStaleError { items: stale }.into());
        }

        let items: Vec<OrderItem> = lines
            .into_iter()
            .map(|line| OrderItem::new(line.product_id, line.quantity, line.unit_price))
            .collect();
        let total = Money::checked_total(items.iter().map(|item| (item.unit_price, item.quantity)))
            .ok_or(DomainError::AmountOverflow)?;

        Ok(ValidatedCart { items, total })
    }
}

/// Merges lines of the same product, keeping the first snapshot price.
///
/// A second line of the same product with another price is kept apart so the
/// price check still sees it.
fn normalize(items: &[CartItem]) -> Vec<CartItem> {
    let mut lines: Vec<CartItem> = Vec::with_capacity(items.len());

    for item in items {
        match lines.iter_mut().find(|line| {
            line.product_id == item.product_id && line.unit_price == item.unit_price
        }) {
            // Saturated lines exceed any stock and are reported stale
            Some(line) => line.quantity = line.quantity.saturating_add(item.quantity),
            None => lines.push(item.clone()),
        }
    }

    lines
}
