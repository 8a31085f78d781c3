//! Checkout configuration and retry policies.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound of a single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Gateway charges: 3 attempts, 200 ms base, 2 s cap.
    pub fn payment() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(2))
    }

    /// Same backoff shape as payments with `max_attempts` attempts.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Builds the backon backoff for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::payment()
    }
}

/// Settings of the checkout workflow and the order materializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Lower-case ISO 4217 code charged for every checkout.
    pub currency: String,
    /// Hard deadline of one checkout workflow.
    pub workflow_timeout: Duration,
    pub payment_retry: RetryPolicy,
    pub enqueue_retry: RetryPolicy,
    pub refund_retry: RetryPolicy,
    pub notification_retry: RetryPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            workflow_timeout: Duration::from_secs(300),
            payment_retry: RetryPolicy::payment(),
            enqueue_retry: RetryPolicy::payment(),
            refund_retry: RetryPolicy::payment(),
            notification_retry: RetryPolicy::payment().with_max_attempts(5),
        }
    }
}
