//! External collaborators of the checkout pipeline and their in-memory
//! implementations.

pub mod gateway;
pub mod notification;

pub use gateway::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentRequest, RefundResult,
};
pub use notification::{
    InMemoryNotificationDispatcher, NotificationDispatcher, NotificationError, NotificationSender,
};
