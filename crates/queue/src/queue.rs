//! The message queue contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

common::uuid_id!(
    /// Identifier assigned to a message when it is published.
    MessageId
);

common::uuid_id!(
    /// Handle identifying one delivery of a message.
    ///
    /// Every receive hands out a fresh handle; only the latest one can ack.
    ReceiptHandle
);

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    /// Number of times this message has been received, this delivery included.
    pub receive_count: u32,
    pub payload: M,
}

/// A message that exceeded the redelivery limit and awaits an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: MessageId,
    /// Raw JSON body, kept even when it no longer decodes.
    pub body: serde_json::Value,
    pub receive_count: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// At-least-once queue of `Message` payloads.
///
/// Consumers must be idempotent: a message is redelivered whenever it is not
/// acknowledged before its visibility timeout expires, or when it is nacked.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    type Message: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Publishes a message and returns its id.
    async fn publish(&self, message: &Self::Message) -> Result<MessageId>;

    /// Receives up to `max_messages` visible messages, hiding each of them
    /// for the visibility timeout.
    async fn receive(&self, max_messages: usize) -> Result<Vec<Delivery<Self::Message>>>;

    /// Deletes the message of a delivery.
    async fn ack(&self, receipt: ReceiptHandle) -> Result<()>;

    /// Makes the message of a delivery visible again immediately.
    async fn nack(&self, receipt: ReceiptHandle) -> Result<()>;

    /// Lists messages in the dead-letter destination, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Moves a dead letter back to the queue with a fresh receive count.
    async fn redrive(&self, message_id: MessageId) -> Result<()>;
}
