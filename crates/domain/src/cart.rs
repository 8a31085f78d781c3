//! Shopping cart snapshot.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::{Money, ProductId};

/// A line of a cart, with the unit price captured when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price per unit at add-time.
    pub unit_price: Money,
}

impl CartItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// The cart owned by a user.
///
/// Items keep the order in which they were added. The cart is deleted once
/// an order has been materialized from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Builds a cart from a list of items, rejecting invalid lines.
    pub fn with_items(user_id: UserId, items: Vec<CartItem>) -> Result<Self, DomainError> {
        let mut cart = Self::new(user_id);
        for item in items {
            cart.add_item(item)?;
        }
        Ok(cart)
    }

    /// Adds an item. Adding a product already present increases its quantity
    /// and refreshes the snapshot price.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), DomainError> {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id: item.product_id.to_string(),
                quantity: item.quantity,
            });
        }
        if item.unit_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                product_id: item.product_id.to_string(),
                price: item.unit_price.cents(),
            });
        }

        let mut items = self.items.clone();
        match items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(
                    || DomainError::QuantityOverflow {
                        product_id: item.product_id.to_string(),
                    },
                )?;
                existing.unit_price = item.unit_price;
            }
            None => items.push(item),
        }

        if Money::checked_total(items.iter().map(|line| (line.unit_price, line.quantity)))
            .is_none()
        {
            return Err(DomainError::AmountOverflow);
        }

        self.items = items;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of `unit_price * quantity` over the snapshot.
    ///
    /// Saturates; carts built through [`Cart::add_item`] never overflow.
    pub fn snapshot_total(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }
}
