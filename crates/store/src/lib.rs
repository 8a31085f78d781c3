//! Storage layer for the checkout pipeline.
//!
//! Catalog, cart, inventory, order and reconciliation stores share one handle
//! ([`CheckoutStore`]) with two backends: [`InMemoryStore`] for tests and the
//! default server, [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    CartStore, CatalogItem, CatalogStore, CheckoutStore, CreateOrderOutcome, DecrementOutcome,
    IdempotencyRecord, InventoryStore, OrderStore, ReconciliationStore,
};
