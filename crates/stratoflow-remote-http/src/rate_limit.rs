//! Client-side per-action rate limiting
//!
//! Each action gets a budget of requests per one-second window. Going over
//! budget does not block: the caller gets a retryable error and the retry
//! executor's backoff spaces the next attempt.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    per_second: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second: per_second.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Take one request from `action`'s budget; false when it is spent
    pub fn try_acquire(&self, action: &str) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = windows.entry(action.to_string()).or_insert(Window {
            started: now,
            used: 0,
        });
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.used = 0;
        }
        if window.used >= self.per_second {
            return false;
        }
        window.used += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_per_action() {
        let limiter = RateLimiter::new(2);

        assert!(limiter.try_acquire("DescribeInstance"));
        assert!(limiter.try_acquire("DescribeInstance"));
        assert!(!limiter.try_acquire("DescribeInstance"));

        // other actions have their own budget
        assert!(limiter.try_acquire("CreateInstance"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire("DescribeInstance"));
        assert!(!limiter.try_acquire("DescribeInstance"));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.try_acquire("DescribeInstance"));
    }
}
