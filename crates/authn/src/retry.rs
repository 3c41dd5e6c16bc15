//! Retry with backoff for transient ledger failures.
//!
//! Only errors where [`LedgerError::is_transient`] holds (connection loss,
//! timeout) are retried. Anything else is returned on the first attempt.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;
use zerotrust_ledger::{LedgerError, LedgerResult};

use crate::config::RetryConfig;

/// Runs `operation`, retrying transient failures per `config`.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut last_error: Option<LedgerError> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => return Err(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| LedgerError::internal("retry loop completed without result or error")))
}

/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..=50%)`.
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = u64::try_from(capped.as_millis() / 2).unwrap_or(u64::MAX);
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig::builder()
            .max_retries(5)
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(10))
            .build()
            .unwrap();

        let d0 = compute_backoff(&config, 0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));

        let d1 = compute_backoff(&config, 1);
        assert!(d1 >= Duration::from_millis(200) && d1 <= Duration::from_millis(300));

        let d2 = compute_backoff(&config, 2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));
    }

    #[test]
    fn test_compute_backoff_capped_at_max() {
        let config = RetryConfig::builder()
            .max_retries(40)
            .initial_backoff(Duration::from_secs(1))
            .max_backoff(Duration::from_secs(5))
            .build()
            .unwrap();

        for attempt in [5, 31, 32, 40] {
            let d = compute_backoff(&config, attempt);
            assert!(d >= Duration::from_secs(5));
            assert!(d <= Duration::from_millis(7500));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast(3), "lookup", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, LedgerError>(42) }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast(3), "lookup", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move { if attempt < 2 { Err(LedgerError::connection("reset")) } else { Ok(42) } }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let calls = AtomicU32::new(0);

        let result: LedgerResult<i32> = with_retry(&fast(3), "lookup", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(LedgerError::serialization("bad row")) }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Serialization { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: LedgerResult<i32> = with_retry(&fast(2), "lookup", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt == 0 { Err(LedgerError::timeout()) } else { Err(LedgerError::connection("down")) }
            }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Connection { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_zero_max_retries_disables_retry() {
        let calls = AtomicU32::new(0);

        let result: LedgerResult<i32> = with_retry(&fast(0), "lookup", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(LedgerError::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Timeout)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
