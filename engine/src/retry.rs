//! Exponential backoff retry helper.
//!
//! A single async helper shared by every provider call site: attempt,
//! classify the error, sleep, retry. A `TransientNetwork` error is retried
//! to a ceiling; a `RateLimit` error is retried honoring the
//! provider-indicated delay without counting against that ceiling.

use std::time::Duration;

use tracing::warn;

use crate::error::PipelineError;

/// Retry policy: base delay, multiplier, and a ceiling on counted attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            base,
            multiplier,
            max_attempts,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(self.base.as_secs_f64() * factor)
    }
}

/// Retry `op` under `policy`. Rate-limit errors sleep for the provider's
/// requested delay (falling back to the policy's backoff curve) and do not
/// count against `max_attempts`; all other retryable errors do.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(PipelineError::RateLimit {
                provider,
                retry_after_secs,
            }) => {
                let delay = retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| policy.delay_for(attempt));
                warn!(
                    what,
                    provider = %provider,
                    delay_secs = delay.as_secs(),
                    "rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "transient error, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, 3);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::TransientNetwork {
                        target: "test".into(),
                        detail: "boom".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_past_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, 1);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(PipelineError::TransientNetwork {
                    target: "test".into(),
                    detail: "boom".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, 3);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(PipelineError::permanent("bad audio")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
