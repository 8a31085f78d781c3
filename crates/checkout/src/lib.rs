//! Checkout workflow and order materialization.
//!
//! The checkout side runs synchronously per caller:
//! 1. Validate the cart against the live catalog
//! 2. Authorize the payment (bounded retry, same idempotency key)
//! 3. Publish one order message to the queue
//!
//! A captured charge whose message cannot be published is refunded here.
//! Problems that need an operator are recorded as reconciliation items.
//!
//! The materialization side runs as a queue consumer and turns each message
//! into exactly one order, taking inventory and clearing the cart.

pub mod authorizer;
pub mod config;
pub mod error;
pub mod materializer;
pub mod orchestrator;
pub mod publisher;
pub mod reconciliation;
pub mod services;
pub mod state;
pub mod validator;

pub use authorizer::{AuthorizedPayment, PaymentAuthorizer};
pub use config::{CheckoutConfig, RetryPolicy};
pub use error::{
    CartStaleError, CheckoutError, InventoryConflictError, PaymentDeclinedError, Result,
    StaleItem, StaleReason,
};
pub use materializer::{MaterializeOutcome, OrderMaterializer};
pub use orchestrator::{CheckoutOutcome, CheckoutRequest, CheckoutStatus, WorkflowOrchestrator};
pub use publisher::QueuePublisher;
pub use domain::{ReconciliationId, ReconciliationItem, ReconciliationKind};
pub use reconciliation::ReconciliationLog;
pub use services::{
    GatewayError, InMemoryNotificationDispatcher, InMemoryPaymentGateway,
    NotificationDispatcher, NotificationError, NotificationSender, PaymentGateway,
    PaymentRequest, RefundResult,
};
pub use state::{Compensation, FailureStep, WorkflowState};
pub use validator::{CartValidator, ValidatedCart};
