//! Domain layer for the checkout pipeline.
//!
//! This crate provides the plain data model shared by every stage:
//! - Cart snapshots owned by users
//! - Payment intents reported by the gateway
//! - The queued order message and notification events
//! - Orders with their forward-only status machine
//! - Reconciliation items for operators

pub mod cart;
pub mod error;
pub mod message;
pub mod order;
pub mod payment;
pub mod reconciliation;
pub mod value_objects;

pub use cart::{Cart, CartItem};
pub use error::DomainError;
pub use message::{
    OrderMessage, OrderNotification, OrderNotificationData, OrderPartiallyFailedData,
};
pub use order::{Order, OrderItem, OrderStatus};
pub use payment::{PaymentIntent, PaymentStatus};
pub use reconciliation::{ReconciliationId, ReconciliationItem, ReconciliationKind};
pub use value_objects::{Money, ProductId, ShippingAddress};
