//! Notification dispatcher trait, in-memory implementation and the
//! fire-and-forget sender in front of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use domain::OrderNotification;
use thiserror::Error;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::config::RetryPolicy;

/// The dispatcher could not deliver an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Notification dispatch failed: {0}")]
pub struct NotificationError(pub String);

/// Delivers order events to customers. Templates and channels live behind it.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + 'static {
    async fn publish(&self, event: &OrderNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryDispatcherState {
    sent: Vec<OrderNotification>,
    failing: u32,
    attempts: u32,
}

/// In-memory dispatcher that records delivered events.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationDispatcher {
    state: Arc<RwLock<InMemoryDispatcherState>>,
    delivered: Arc<Notify>,
}

impl InMemoryNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publish calls fail.
    pub async fn fail_next(&self, n: u32) {
        self.state.write().await.failing = n;
    }

    pub async fn sent(&self) -> Vec<OrderNotification> {
        self.state.read().await.sent.clone()
    }

    /// Number of publish calls, failed ones included.
    pub async fn attempts(&self) -> u32 {
        self.state.read().await.attempts
    }

    /// Waits until at least `count` events were delivered, or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.delivered.notified();
                if self.state.read().await.sent.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotificationDispatcher {
    async fn publish(&self, event: &OrderNotification) -> Result<(), NotificationError> {
        let mut state = self.state.write().await;
        state.attempts += 1;

        if state.failing > 0 {
            state.failing -= 1;
            return Err(NotificationError("channel unavailable".to_string()));
        }

        state.sent.push(event.clone());
        drop(state);
        self.delivered.notify_waiters();
        Ok(())
    }
}

/// Fire-and-forget handle to a dispatcher.
///
/// `send` never blocks or fails the caller; a background task delivers each
/// event with its own bounded retry and logs events it had to give up on.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<OrderNotification>,
}

impl NotificationSender {
    /// Spawns the delivery task and returns the sender feeding it.
    ///
    /// The task ends once every sender has been dropped and the backlog is
    /// delivered.
    pub fn spawn<D: NotificationDispatcher>(
        dispatcher: D,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OrderNotification>();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&dispatcher, &event, policy).await;
            }
        });

        (Self { tx }, handle)
    }

    /// Queues an event for delivery.
    pub fn send(&self, event: OrderNotification) {
        let event_type = event.event_type();
        let order_id = event.order_id();
        if self.tx.send(event).is_err() {
            tracing::error!(%order_id, event_type, "Notification task stopped, event dropped");
            metrics::counter!("notifications_total", "result" => "dropped").increment(1);
        }
    }
}

#[tracing::instrument(skip(dispatcher, event, policy), fields(order_id = %event.order_id(), event_type = event.event_type()))]
async fn deliver<D: NotificationDispatcher>(
    dispatcher: &D,
    event: &OrderNotification,
    policy: RetryPolicy,
) {
    let result = (|| async { dispatcher.publish(event).await })
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err, dur| tracing::warn!(error = %err, ?dur, "Retrying notification"))
        .await;

    match result {
        Ok(()) => {
            metrics::counter!("notifications_total", "result" => "sent").increment(1);
            tracing::debug!("Notification sent");
        }
        Err(err) => {
            metrics::counter!("notifications_total", "result" => "failed").increment(1);
            tracing::error!(error = %err, "Notification abandoned after retries");
        }
    }
}
