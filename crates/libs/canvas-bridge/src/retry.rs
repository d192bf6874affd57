use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::BridgeError;

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total sends per logical call, the first attempt included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay between attempt `attempt` and the next one:
    /// `base * 2^(attempt - 1)`, clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    /// Whether `error`, raised by attempt number `attempt`, warrants another send.
    pub fn should_retry(&self, error: &BridgeError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// The error handed to callers once no further attempt will be made.
    pub fn finalize(&self, method: &str, attempts: u32, error: BridgeError) -> BridgeError {
        if attempts > 1 && error.is_retryable() {
            BridgeError::RetriesExhausted {
                method: method.to_string(),
                attempts,
                last: Box::new(error),
            }
        } else {
            error
        }
    }
}
