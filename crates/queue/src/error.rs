//! Queue error types.

use thiserror::Error;

use crate::queue::{MessageId, ReceiptHandle};

/// Errors that can occur when talking to the message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue could not accept or serve the request.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The receipt handle does not belong to the current delivery of any message.
    ///
    /// Happens when the message was already acknowledged, or when its
    /// visibility timeout expired and another consumer received it.
    #[error("Stale receipt handle: {0}")]
    StaleReceipt(ReceiptHandle),

    /// No dead letter with this id exists.
    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(MessageId),

    /// A payload could not be encoded for the wire.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
