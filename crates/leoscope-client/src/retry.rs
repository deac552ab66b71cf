//! Retry combinator with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Bounded retry budget for transport failures.
///
/// Domain errors are returned immediately; only transport-layer failures
/// and explicit `unavailable` responses are retried. Mutators are
/// idempotent by caller-assigned record id, so replays are safe.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Run an operation under this policy.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    debug!(attempt = attempt + 1, error = %err, "retryable call failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(ClientError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: last_error.map_or_else(|| "no attempts made".to_owned(), |e| e.to_string()),
        })
    }

    /// Exponential delay for the given attempt with +/-50% jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        exp.mul_f64(jitter).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use leoscope_proto::ErrorCode;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ClientError>(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::api(ErrorCode::Conflict, "overlap"))
            })
            .await;
        assert!(matches!(result, Err(ClientError::Api(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_is_retried_until_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::api(ErrorCode::Unavailable, "backend down"))
            })
            .await;
        assert!(matches!(result, Err(ClientError::RetriesExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ClientError::api(ErrorCode::Unavailable, "flaky"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
    }
}
