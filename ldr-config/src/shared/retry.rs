use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy for restarting a replication flow after a retryable failure.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of consecutive restarts without progress before the job fails.
    pub max_attempts: u32,
    /// Initial delay, in milliseconds, before the first restart.
    pub initial_delay_ms: u64,
    /// Maximum delay between restarts.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    /// Delay before the restart numbered `attempt`, starting at zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = f64::from(self.backoff_factor).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay_ms as f64 * factor;

        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidRetry("`max_attempts` cannot be zero"));
        }

        if self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidRetry(
                "`backoff_factor` must be at least 1.0",
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetry(
                "`initial_delay_ms` cannot exceed `max_delay_ms`",
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}
