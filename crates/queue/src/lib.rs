//! At-least-once message queue for the checkout pipeline.
//!
//! This crate provides:
//! - The [`MessageQueue`] contract: publish, receive with a visibility
//!   timeout, ack, nack, plus dead-letter listing and redrive
//! - [`InMemoryMessageQueue`], a JSON-on-the-wire stand-in for a managed queue
//! - [`ConsumerPool`], N worker loops feeding deliveries to a [`MessageHandler`]

pub mod consumer;
pub mod error;
pub mod memory;
pub mod queue;

pub use consumer::{ConsumerConfig, ConsumerPool, MessageHandler, PollStats};
pub use error::{QueueError, Result};
pub use memory::{InMemoryMessageQueue, QueueConfig};
pub use queue::{DeadLetter, Delivery, MessageId, MessageQueue, ReceiptHandle};
