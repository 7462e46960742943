//! Retry policy shared by every network-calling client.
//!
//! A [`RetryPolicy`] makes at most `max_attempts` calls. Between attempts it
//! sleeps `backoff_base ^ attempt` seconds (1s, 2s, 4s, ... with the default
//! base of 2.0). Errors the predicate rejects (by default anything
//! [`SyncError::is_retryable`] says no to, notably authentication failures)
//! are returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::SyncError;

/// Longest sleep between two attempts.
pub const MAX_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Delay slept after the failed attempt with index `attempt` (0-based),
    /// capped at [`MAX_DELAY`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_base.powi(attempt.min(i32::MAX as u32) as i32);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Run `operation`, retrying errors that [`SyncError::is_retryable`] accepts.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.run_when(label, operation, SyncError::is_retryable).await
    }

    /// Run `operation`, retrying only errors for which `retryable` returns true.
    ///
    /// The error of the final attempt is returned unchanged.
    pub async fn run_when<T, F, Fut, P>(
        &self,
        label: &str,
        mut operation: F,
        retryable: P,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
        P: Fn(&SyncError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !retryable(&err) {
                return Err(err);
            }

            attempt += 1;
            if attempt >= attempts {
                error!("Max retries reached for {}: {}", label, err);
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                "Retry {}/{} for {} after {:?}: {}",
                attempt, attempts, label, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_is_base_to_the_attempt() {
        let policy = RetryPolicy::new(5, 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_huge_backoff_is_capped() {
        let policy = RetryPolicy::new(3, 1e20);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), MAX_DELAY);
        assert_eq!(policy.delay_for(40), MAX_DELAY);
        assert_eq!(RetryPolicy::new(3, f64::INFINITY).delay_for(1), MAX_DELAY);
        assert_eq!(RetryPolicy::new(3, 2.0).delay_for(u32::MAX), MAX_DELAY);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, 2.0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation_is_tried_max_attempts_times() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 2.0);

        let err = policy
            .run("always fails", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::Http { status: 503, message: "down".into() }) }
            })
            .await
            .expect_err("should give up");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, SyncError::Http { status: 503, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 2.0);

        let err = policy
            .run("auth", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::from_status(401, "bad token")) }
            })
            .await
            .expect_err("auth fails");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_auth());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 2.0);
        let started = tokio::time::Instant::now();

        let value = policy
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::Network("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_controls_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, 1.0);

        let _ = policy
            .run_when(
                "never retry",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(SyncError::Network("reset".into())) }
                },
                |_| false,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
