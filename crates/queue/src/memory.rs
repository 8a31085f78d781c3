//! In-memory message queue.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    QueueError, Result,
    queue::{DeadLetter, Delivery, MessageId, MessageQueue, ReceiptHandle},
};

/// Visibility and dead-letter settings of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a received message stays hidden before it is redelivered.
    pub visibility_timeout: Duration,
    /// Receive count after which a message goes to the dead-letter list
    /// instead of being delivered again.
    pub max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<ReceiptHandle>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    failing_publishes: u32,
    published: u64,
}

/// In-memory queue storing JSON bodies, with visibility timeouts and a
/// dead-letter list.
///
/// Clones share the same underlying queue.
pub struct InMemoryMessageQueue<M> {
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for InMemoryMessageQueue<M> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            state: Arc::clone(&self.state),
            _message: PhantomData,
        }
    }
}

impl<M> Default for InMemoryMessageQueue<M> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<M> InMemoryMessageQueue<M> {
    /// Creates an empty queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(QueueState::default())),
            _message: PhantomData,
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Makes the next `n` publishes fail with `Unavailable`.
    pub async fn fail_next_publishes(&self, n: u32) {
        self.state.lock().await.failing_publishes = n;
    }

    /// Total number of messages accepted by `publish`.
    pub async fn published_count(&self) -> u64 {
        self.state.lock().await.published
    }

    /// Number of messages still in the queue, visible or in flight.
    pub async fn depth(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Number of received messages not yet acknowledged.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|message| message.receipt.is_some() && message.visible_at > now)
            .count()
    }

    fn dead_letter(state: &mut QueueState, message: StoredMessage, reason: String) {
        let body = serde_json::from_str(&message.body)
            .unwrap_or(serde_json::Value::String(message.body));

        tracing::error!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            reason = %reason,
            "Message moved to dead-letter destination"
        );
        metrics::counter!("dead_letters_total").increment(1);

        state.dead_letters.push(DeadLetter {
            message_id: message.message_id,
            body,
            receive_count: message.receive_count,
            reason,
            dead_lettered_at: Utc::now(),
        });
    }

    fn position_of(state: &QueueState, receipt: ReceiptHandle) -> Result<usize> {
        state
            .messages
            .iter()
            .position(|message| message.receipt == Some(receipt))
            .ok_or(QueueError::StaleReceipt(receipt))
    }
}

#[async_trait]
impl<M> MessageQueue for InMemoryMessageQueue<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Message = M;

    async fn publish(&self, message: &M) -> Result<MessageId> {
        let body = serde_json::to_string(message)?;

        let mut state = self.state.lock().await;
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(QueueError::Unavailable(
                "injected publish failure".to_string(),
            ));
        }

        let message_id = MessageId::new();
        state.messages.push_back(StoredMessage {
            message_id,
            body,
            receive_count: 0,
            visible_at: Instant::now(),
            receipt: None,
        });
        state.published += 1;

        tracing::debug!(%message_id, "Message published");
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<Delivery<M>>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut deliveries = Vec::new();
        let mut index = 0;

        while index < state.messages.len() && deliveries.len() < max_messages {
            if state.messages[index].visible_at > now {
                index += 1;
                continue;
            }

            if state.messages[index].receive_count >= self.config.max_receive_count {
                if let Some(message) = state.messages.remove(index) {
                    let reason = format!(
                        "not acknowledged after {} deliveries",
                        message.receive_count
                    );
                    Self::dead_letter(&mut state, message, reason);
                }
                continue;
            }

            let payload = match serde_json::from_str::<M>(&state.messages[index].body) {
                Ok(payload) => payload,
                Err(err) => {
                    if let Some(message) = state.messages.remove(index) {
                        Self::dead_letter(&mut state, message, format!("undecodable body: {err}"));
                    }
                    continue;
                }
            };

            let receipt = ReceiptHandle::new();
            let message = &mut state.messages[index];
            message.receive_count += 1;
            message.visible_at = now + self.config.visibility_timeout;
            message.receipt = Some(receipt);

            deliveries.push(Delivery {
                message_id: message.message_id,
                receipt,
                receive_count: message.receive_count,
                payload,
            });
            index += 1;
        }

        Ok(deliveries)
    }

    async fn ack(&self, receipt: ReceiptHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = Self::position_of(&state, receipt)?;
        state.messages.remove(position);
        Ok(())
    }

    async fn nack(&self, receipt: ReceiptHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = Self::position_of(&state, receipt)?;
        let message = &mut state.messages[position];
        message.receipt = None;
        message.visible_at = Instant::now();
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead_letters.clone())
    }

    async fn redrive(&self, message_id: MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = state
            .dead_letters
            .iter()
            .position(|letter| letter.message_id == message_id)
            .ok_or(QueueError::DeadLetterNotFound(message_id))?;

        let letter = state.dead_letters.remove(position);
        state.messages.push_back(StoredMessage {
            message_id: letter.message_id,
            body: letter.body.to_string(),
            receive_count: 0,
            visible_at: Instant::now(),
            receipt: None,
        });

        tracing::info!(%message_id, "Dead letter redriven");
        Ok(())
    }
}
