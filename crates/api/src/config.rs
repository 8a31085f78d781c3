//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout::{CheckoutConfig, RetryPolicy};
use queue::{ConsumerConfig, QueueConfig};
use thiserror::Error;

/// A variable was set to something that does not parse.
#[derive(Debug, Error)]
#[error("Invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: selects PostgreSQL when set, in-memory storage otherwise
/// - `CHECKOUT_CURRENCY`, `WORKFLOW_TIMEOUT_SECS`
/// - `PAYMENT_MAX_ATTEMPTS`, `PAYMENT_BACKOFF_BASE_MS`, `PAYMENT_BACKOFF_CAP_MS`
/// - `ENQUEUE_MAX_ATTEMPTS`, `REFUND_MAX_ATTEMPTS`, `NOTIFICATION_MAX_ATTEMPTS`
/// - `CONSUMER_WORKERS`, `CONSUMER_BATCH_SIZE`, `CONSUMER_POLL_INTERVAL_MS`
/// - `QUEUE_VISIBILITY_TIMEOUT_SECS`, `QUEUE_MAX_RECEIVE_COUNT`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub checkout: CheckoutConfig,
    pub queue: QueueConfig,
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            parse_var(&lookup, key)
        };
        let count = |key: &'static str| -> Result<Option<u32>, ConfigError> {
            parse_var(&lookup, key)
        };

        let payment = RetryPolicy::new(
            count("PAYMENT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.checkout.payment_retry.max_attempts),
            parse("PAYMENT_BACKOFF_BASE_MS")?
                .map_or(defaults.checkout.payment_retry.base_delay, Duration::from_millis),
            parse("PAYMENT_BACKOFF_CAP_MS")?
                .map_or(defaults.checkout.payment_retry.max_delay, Duration::from_millis),
        );
        // Every policy shares the payment backoff shape
        let attempts = |key, default: RetryPolicy| -> Result<RetryPolicy, ConfigError> {
            Ok(payment.with_max_attempts(count(key)?.unwrap_or(default.max_attempts)))
        };

        let checkout = CheckoutConfig {
            currency: lookup("CHECKOUT_CURRENCY").unwrap_or(defaults.checkout.currency),
            workflow_timeout: parse("WORKFLOW_TIMEOUT_SECS")?
                .map_or(defaults.checkout.workflow_timeout, Duration::from_secs),
            payment_retry: payment,
            enqueue_retry: attempts("ENQUEUE_MAX_ATTEMPTS", defaults.checkout.enqueue_retry)?,
            refund_retry: attempts("REFUND_MAX_ATTEMPTS", defaults.checkout.refund_retry)?,
            notification_retry: attempts(
                "NOTIFICATION_MAX_ATTEMPTS",
                defaults.checkout.notification_retry,
            )?,
        };

        let queue = QueueConfig {
            visibility_timeout: parse("QUEUE_VISIBILITY_TIMEOUT_SECS")?
                .map_or(defaults.queue.visibility_timeout, Duration::from_secs),
            max_receive_count: count("QUEUE_MAX_RECEIVE_COUNT")?
                .unwrap_or(defaults.queue.max_receive_count),
        };

        let consumer = ConsumerConfig {
            workers: parse_var(&lookup, "CONSUMER_WORKERS")?
                .unwrap_or(defaults.consumer.workers),
            batch_size: parse_var(&lookup, "CONSUMER_BATCH_SIZE")?
                .unwrap_or(defaults.consumer.batch_size),
            poll_interval: parse("CONSUMER_POLL_INTERVAL_MS")?
                .map_or(defaults.consumer.poll_interval, Duration::from_millis),
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            checkout,
            queue,
            consumer,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { key, value }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            checkout: CheckoutConfig::default(),
            queue: QueueConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}
