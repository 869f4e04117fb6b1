use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Sizing and timeouts of the source connection pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PoolConfig {
    /// Maximum number of open source connections.
    pub size: usize,
    /// How long to wait for a connection before failing, in milliseconds.
    pub connection_timeout_ms: u64,
    /// How long an unused connection is kept open, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Maximum age of a connection before it is recycled, in milliseconds.
    pub max_lifetime_ms: u64,
}

impl PoolConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.size == 0 {
            return Err(ValidationError::OutOfRange {
                field: "pool.size",
                value: 0,
                min: 1,
                max: usize::MAX as u64,
            });
        }

        if self.connection_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig(
                "`pool.connection_timeout_ms` must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            connection_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
            max_lifetime_ms: 1_800_000,
        }
    }
}
