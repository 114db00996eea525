//! Exponential backoff with jitter for retryable source errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use opsbox_core::SourceError;

/// Retry policy applied by adapters to outbound calls.
///
/// Only [`SourceError::is_retryable`] classes (`Transient`, `RateLimited`)
/// are retried. Delays grow exponentially from `base_delay`, capped at
/// `max_delay`, with a 50-100% jitter multiplier to avoid thundering
/// retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempt ceiling (first call included).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Jittered delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        exp.mul_f64(jitter)
    }

    /// Runs `op` until it succeeds, fails non-retryably, or the attempt
    /// ceiling is reached. The closure receives the zero-based attempt
    /// number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, kind = err.kind(), ?delay, "retrying after error");
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        // Unreachable unless attempts == 0 was clamped; keep the last error.
        Err(last_err.unwrap_or_else(|| SourceError::Fatal("retry loop exhausted".to_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = policy
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SourceError::Transient("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::AuthFailed("denied".into())) }
            })
            .await;
        assert!(matches!(result, Err(SourceError::AuthFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::RateLimited("quota".into())) }
            })
            .await;
        assert!(matches!(result, Err(SourceError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        // Jitter is 0.5..=1.0, so bounds are deterministic.
        assert!(policy.delay_for(0) <= Duration::from_millis(100));
        assert!(policy.delay_for(10) <= Duration::from_millis(350));
        assert!(policy.delay_for(10) >= Duration::from_millis(175));
    }
}
