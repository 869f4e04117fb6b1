//! Exponential backoff around fallible async operations.

use std::future::Future;
use std::time::Duration;

use cache_config::shared::RetryConfig;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::TableCopyError;

/// Failures that know whether another attempt may succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for EngineError {
    fn is_transient(&self) -> bool {
        EngineError::is_transient(self)
    }
}

impl Retryable for TableCopyError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Delay before retry number `attempt` (starting at 1), capped at the configured maximum.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = config.backoff_factor.max(1.0).powi(exponent);
    let delay_ms = (config.initial_delay_ms as f64 * factor).min(config.max_delay_ms as f64);

    Duration::from_millis(delay_ms as u64)
}

/// Runs `operation` until it succeeds, fails permanently or exhausts the retries.
///
/// Transient failures are retried up to `max_retries` times. `on_retry` receives the attempt
/// number and the failure before each sleep. Permanent failures and the last transient failure
/// are returned unchanged.
pub async fn with_retry<T, E, Op, Fut, R, RFut>(
    config: &RetryConfig,
    mut operation: Op,
    mut on_retry: R,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E) -> RFut,
    RFut: Future<Output = ()>,
{
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() {
            debug!(error = %err, "non retryable failure");
            return Err(err);
        }

        if attempt >= config.max_retries {
            warn!(
                error = %err,
                retries = attempt,
                "transient failure persisted, giving up"
            );
            return Err(err);
        }

        attempt += 1;
        let delay = backoff_delay(config, attempt);
        warn!(
            error = %err,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );

        on_retry(attempt, &err).await;
        tokio::time::sleep(delay).await;
    }
}
