//! Rate-limit retries honor the provider's requested delay and never count
//! against the backoff ceiling, unlike a plain transient error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use digest_pipeline_engine::retry::{retry_with_backoff, BackoffPolicy};
use digest_pipeline_engine::PipelineError;

#[tokio::test]
async fn rate_limit_retries_do_not_exhaust_the_attempt_ceiling() {
    // A ceiling of 1 would normally allow only one retry of a transient
    // error; three rate-limit responses in a row must not trip it, since
    // rate limits aren't counted attempts.
    let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, 1);
    let calls = AtomicU32::new(0);

    let result = retry_with_backoff(policy, "tts_chunk", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 3 {
                Err(PipelineError::RateLimit {
                    provider: "tts".to_string(),
                    retry_after_secs: Some(0),
                })
            } else {
                Ok(())
            }
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn rate_limit_then_transient_error_still_respects_the_transient_ceiling() {
    // Mixed failure modes: a rate limit is free, but the transient error
    // that follows still counts toward the policy's ceiling.
    let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, 1);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retry_with_backoff(policy, "tts_chunk", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(PipelineError::RateLimit {
                    provider: "tts".to_string(),
                    retry_after_secs: Some(0),
                })
            } else {
                Err(PipelineError::TransientNetwork {
                    target: "tts-endpoint".to_string(),
                    detail: "connection reset".to_string(),
                })
            }
        }
    })
    .await;

    assert!(result.is_err());
    // One rate-limited call (uncounted) plus two transient attempts
    // (initial + one retry under a ceiling of 1).
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
