//! Identifier types shared by every crate of the checkout pipeline.

pub mod types;

pub use types::{CheckoutAttemptId, OrderId, UserId};
