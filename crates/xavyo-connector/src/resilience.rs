//! Retry pacing for connector operations.
//!
//! Provides the retry bound and exponential backoff used between
//! failure-triggered attempts of a long-running operation.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts. `None` leaves the bound to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add up to 25% jitter to delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Retry immediately, without any pause between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
            ..Default::default()
        }
    }

    /// Bound the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Whether attempt number `attempt` (1-based) is still permitted.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Calculate the delay before retry number `retry` (0-indexed).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
            delay_ms * jitter_factor
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Sleep for the backoff delay of retry number `retry`.
    pub async fn pause(&self, retry: u32) {
        let delay = self.calculate_delay(retry);
        if delay.is_zero() {
            return;
        }
        debug!(retry, delay_ms = delay.as_millis() as u64, "Backing off before retry");
        tokio::time::sleep(delay).await;
    }
}
