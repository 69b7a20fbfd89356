//! Poll-until-predicate helpers
//!
//! Used for every "wait until the remote settles" step: create until
//! serving, update until stable again, isolate until isolated, delete until
//! gone. A read that fails with a retryable error is just another pending
//! observation; any other read failure ends the wait.

use crate::error::{RemoteError, Result};
use crate::retry::{BackoffPolicy, RetryExecutor};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one observation means for the wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision<T> {
    /// Done, with the value to hand back
    Ready(T),
    /// Not yet, keep polling
    Pending(String),
    /// The remote reached a state the wait can never recover from
    Failed(String),
}

/// Pending/target status sets for a status-attribute wait
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusWait {
    /// Statuses that mean "still working". Empty = anything but target.
    pub pending: Vec<String>,
    pub target: Vec<String>,
}

impl StatusWait {
    pub fn new(pending: &[&str], target: &[&str]) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn decide(&self, status: Option<&str>) -> PollDecision<()> {
        match status {
            Some(s) if self.target.iter().any(|t| t == s) => PollDecision::Ready(()),
            Some(s) if self.pending.is_empty() || self.pending.iter().any(|p| p == s) => {
                PollDecision::Pending(format!("status is {}", s))
            }
            Some(s) => PollDecision::Failed(format!(
                "unexpected status {} (waiting for {})",
                s,
                self.target.join("|")
            )),
            None => PollDecision::Pending("status not reported yet".to_string()),
        }
    }
}

/// Fixed-interval poller bounded by a timeout
///
/// Each pending observation is a retryable failure for a [`RetryExecutor`]
/// running a constant backoff, so polling shares its deadline and
/// cancellation handling with every other remote call.
#[derive(Debug, Clone)]
pub struct Poller {
    executor: RetryExecutor,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            executor: RetryExecutor::new(BackoffPolicy::constant(interval)),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(token);
        self
    }

    /// Read repeatedly until `decide` says ready, fails, or `timeout` elapses
    pub async fn poll_until<S, T, R, Fut, D>(&self, timeout: Duration, mut read: R, decide: D) -> Result<T>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<S, RemoteError>>,
        D: FnMut(S) -> PollDecision<T>,
    {
        let decide = Mutex::new(decide);
        let decide = &decide;

        self.executor
            .execute(timeout, || {
                let observation = read();
                async move {
                    let observed = observation.await?;
                    let decision = (decide.lock().unwrap_or_else(PoisonError::into_inner))(observed);
                    match decision {
                        PollDecision::Ready(value) => Ok(value),
                        PollDecision::Pending(reason) => Err(RemoteError::retryable(reason)),
                        PollDecision::Failed(reason) => Err(RemoteError::fatal(reason)),
                    }
                }
            })
            .await
    }
}
