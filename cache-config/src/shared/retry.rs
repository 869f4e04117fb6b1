use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Exponential backoff policy applied to transient per-table failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryConfig {
    /// Number of retries after the first failed attempt.
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound of the delay between two attempts, in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after every retry.
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidConfig(format!(
                "`retry.backoff_factor` must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidConfig(
                "`retry.initial_delay_ms` cannot exceed `retry.max_delay_ms`".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}
