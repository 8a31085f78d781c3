//! Hands order messages to the queue.

use backon::Retryable;
use domain::OrderMessage;
use queue::{MessageId, MessageQueue};

use crate::Result;
use crate::config::RetryPolicy;

/// Publishes exactly one order message per checkout attempt, retrying a
/// bounded number of times.
///
/// A retry after an ambiguous failure may publish the message twice; the
/// order materializer is idempotent per checkout attempt.
pub struct QueuePublisher<Q> {
    queue: Q,
    policy: RetryPolicy,
}

impl<Q> QueuePublisher<Q>
where
    Q: MessageQueue<Message = OrderMessage>,
{
    pub fn new(queue: Q, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    #[tracing::instrument(skip(self, message), fields(checkout_attempt_id = %message.checkout_attempt_id))]
    pub async fn publish(&self, message: &OrderMessage) -> Result<MessageId> {
        let message_id = (|| async { self.queue.publish(message).await })
            .retry(self.policy.backoff())
            .sleep(tokio::time::sleep)
            .notify(|err, dur| {
                tracing::warn!(error = %err, ?dur, "Queue publish failed, retrying");
            })
            .await?;

        tracing::info!(%message_id, "Order message published");
        Ok(message_id)
    }
}
