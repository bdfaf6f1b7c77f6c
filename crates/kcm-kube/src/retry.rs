//! Bounded retries for transient cluster failures
//!
//! Apply and delete of whole manifests back off exponentially; the cluster
//! readiness probe retries at a constant pace. Cancellation is observed
//! between attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{KubeError, Result};
use crate::exec::ExecContext;

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 1.0 keeps the delay constant
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(10)
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter, starting at 500ms and capped at 30s
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Fixed delay between attempts
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// No delay at all, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::constant(max_attempts, Duration::ZERO)
    }

    /// Policy for applying and deleting manifests
    pub fn for_manifests() -> Self {
        Self::exponential(10)
    }

    /// Policy for the cluster readiness probe
    pub fn for_cluster() -> Self {
        Self::constant(30, Duration::from_secs(2))
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Run `operation` until it succeeds or the attempts run out
///
/// Returns the last error once exhausted; `Cancelled` is never retried.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    ctx: &ExecContext,
    mut operation: F,
) -> std::result::Result<T, (u32, KubeError)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Err(e) = ctx.check() {
            return Err((attempt - 1, e));
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err((attempt, e)),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            tracing::error!(
                operation = %operation_name,
                attempt,
                error = %err,
                "giving up"
            );
            return Err((attempt, err));
        }

        let wait = config.jittered(delay);
        tracing::warn!(
            operation = %operation_name,
            attempt,
            max_attempts,
            error = %err,
            delay_ms = wait.as_millis() as u64,
            "attempt failed, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = ctx.token().cancelled() => return Err((attempt, KubeError::Cancelled)),
        }
        delay = config.next_delay(delay);
    }
}

/// Like [`retry_with_backoff`], wrapping exhaustion into `RetriesExhausted`
pub async fn retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    ctx: &ExecContext,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(config, operation_name, ctx, operation)
        .await
        .map_err(|(attempts, e)| match e {
            KubeError::Cancelled => KubeError::Cancelled,
            e => KubeError::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts,
                source: Box::new(e),
            },
        })
}
