//! Retry and backoff policy for pool creation.
//!
//! Pool creation retries in an explicit attempt loop (see
//! [`crate::database::pool`]); this module only owns the policy values and the
//! delay calculation.

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY_MS, DEFAULT_RETRY_DELAY_MS,
    RETRY_JITTER_FRACTION,
};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (just execute once).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    ///
    /// `min(initial * 2^attempt + jitter, max)`, with jitter below 10% of the
    /// exponential term, so successive delays never decrease.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(63) as i32);
        let base_ms = self.initial_delay.as_millis() as f64 * factor;

        let jitter_ms = if self.jitter {
            base_ms * RETRY_JITTER_FRACTION * rand::random::<f64>()
        } else {
            0.0
        };

        let capped_ms = (base_ms + jitter_ms).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}
