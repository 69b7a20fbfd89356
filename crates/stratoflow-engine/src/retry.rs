//! Retry with bounded exponential backoff
//!
//! The wrapped call classifies its own failures; the executor only looks at
//! [`RemoteError::is_retryable`]. Total time spent is bounded by the timeout
//! handed to [`RetryExecutor::execute`]: every sleep is clipped to the
//! remaining budget.

use crate::error::{EngineError, RemoteError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Random extra delay, as a fraction of the computed delay (0.0 disables)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Fixed interval, no jitter. Used for status polling.
    pub fn constant(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retrying after the given (0-based) attempt, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(factor).min(self.max_delay)
    }
}

/// Runs a remote call until it succeeds, fails fatally or the budget runs out
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: BackoffPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    /// Stop between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Invoke `call` until success, a non-retryable error, or `timeout`.
    ///
    /// Returns [`EngineError::Remote`] for non-retryable failures,
    /// [`EngineError::DeadlineExceeded`] when only retryable failures were
    /// seen before the budget ran out, and [`EngineError::Interrupted`] when
    /// cancellation was requested between attempts.
    pub async fn execute<T, F, Fut>(&self, timeout: Duration, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempts: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(EngineError::Interrupted);
            }

            attempts += 1;
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(EngineError::Remote(e)),
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::DeadlineExceeded {
                    elapsed: now.duration_since(start),
                    attempts,
                    last_error: error.to_string(),
                });
            }

            let delay = self
                .policy
                .jittered_delay(attempts - 1)
                .min(deadline.duration_since(now));

            tracing::debug!(
                "Attempt {} failed ({}), retrying in {:?}",
                attempts,
                error,
                delay
            );

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = token.cancelled() => return Err(EngineError::Interrupted),
                    }
                }
                None => sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10)); // capped at max
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.5,
        };
        for _ in 0..100 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy());

        let counter = calls.clone();
        let result = executor
            .execute(Duration::from_secs(10), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RemoteError::retryable("throttled"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy());

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute(Duration::from_secs(10), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RemoteError::fatal("invalid parameter"))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let executor = RetryExecutor::new(fast_policy());
        let result: Result<()> = executor
            .execute(Duration::from_secs(10), || async {
                Err(RemoteError::not_found("gone"))
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.remote().is_some_and(RemoteError::is_not_found));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_bounded() {
        let policy = fast_policy();
        let executor = RetryExecutor::new(policy.clone());
        let timeout = Duration::from_secs(5);
        let start = Instant::now();

        let result: Result<()> = executor
            .execute(timeout, || async { Err(RemoteError::retryable("busy")) })
            .await;

        let elapsed = start.elapsed();
        match result {
            Err(EngineError::DeadlineExceeded {
                attempts,
                last_error,
                ..
            }) => {
                assert!(attempts > 1);
                assert!(last_error.contains("busy"));
            }
            other => panic!("expected deadline exceeded, got {other:?}"),
        }
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_attempts() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(fast_policy()).with_cancellation(token.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<()> = executor
            .execute(Duration::from_secs(60), || {
                let counter = counter.clone();
                let token = token.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    token.cancel();
                    Err(RemoteError::retryable("busy"))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
