//! Worker pool feeding queue deliveries to a handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    queue::{Delivery, MessageQueue},
};

/// Processes one delivered message.
///
/// Returning `Ok` acknowledges the message. Returning `Err` nacks it so the
/// queue redelivers it, up to the dead-letter threshold.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    async fn handle(&self, delivery: &Delivery<M>) -> std::result::Result<(), Self::Error>;
}

#[async_trait]
impl<M, H> MessageHandler<M> for Arc<H>
where
    M: Send + Sync + 'static,
    H: MessageHandler<M>,
{
    type Error = H::Error;

    async fn handle(&self, delivery: &Delivery<M>) -> std::result::Result<(), Self::Error> {
        (**self).handle(delivery).await
    }
}

/// Settings of the consumer worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Number of independent worker loops.
    pub workers: usize,
    /// Maximum messages received (and handled concurrently) per poll.
    pub batch_size: usize,
    /// Sleep between polls that found nothing.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
}

enum Settled {
    Acked,
    Nacked,
}

/// Pool of worker loops consuming a [`MessageQueue`].
pub struct ConsumerPool<Q, H> {
    queue: Q,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<Q: Clone, H> Clone for ConsumerPool<Q, H> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
            config: self.config,
        }
    }
}

impl<Q, H> ConsumerPool<Q, H>
where
    Q: MessageQueue + Clone + 'static,
    H: MessageHandler<Q::Message>,
{
    pub fn new(queue: Q, handler: H, config: ConsumerConfig) -> Self {
        Self {
            queue,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Receives one batch and handles it, acking or nacking every delivery.
    pub async fn poll_once(&self) -> Result<PollStats> {
        let deliveries = self.queue.receive(self.config.batch_size).await?;
        let mut stats = PollStats {
            received: deliveries.len(),
            ..PollStats::default()
        };

        let settled: Vec<Result<Settled>> = stream::iter(deliveries)
            .map(|delivery| self.process(delivery))
            .buffer_unordered(self.config.batch_size.max(1))
            .collect()
            .await;

        for result in settled {
            match result {
                Ok(Settled::Acked) => stats.acked += 1,
                Ok(Settled::Nacked) => stats.nacked += 1,
                // The message stays hidden and comes back after its visibility timeout
                Err(err) => tracing::warn!(error = %err, "Failed to settle delivery"),
            }
        }

        Ok(stats)
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(message_id = %delivery.message_id, receive_count = delivery.receive_count)
    )]
    async fn process(&self, delivery: Delivery<Q::Message>) -> Result<Settled> {
        match self.handler.handle(&delivery).await {
            Ok(()) => {
                self.queue.ack(delivery.receipt).await?;
                Ok(Settled::Acked)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Handler failed, message will be redelivered");
                self.queue.nack(delivery.receipt).await?;
                Ok(Settled::Nacked)
            }
        }
    }

    /// Runs one worker loop until `shutdown` is cancelled.
    ///
    /// A batch that is already being handled is finished before the loop exits.
    pub async fn run_worker(&self, worker: usize, shutdown: CancellationToken) {
        tracing::info!(worker, "Consumer worker starting");

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once().await {
                Ok(stats) => stats.received == 0,
                Err(err) => {
                    tracing::error!(worker, error = %err, "Polling the queue failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::info!(worker, "Consumer worker stopped");
    }

    /// Spawns `config.workers` worker loops on the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>>
    where
        Q: Send + Sync,
    {
        (0..self.config.workers.max(1))
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, shutdown).await })
            })
            .collect()
    }
}
