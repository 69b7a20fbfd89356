//! Remote API collaborator
//!
//! The engine talks to the outside world through a single `invoke` call.
//! Authentication, signing, region routing and rate limiting all live behind
//! this trait; failures come back already classified.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Request body sent to the remote API (a JSON object)
pub type RequestPayload = serde_json::Map<String, serde_json::Value>;

/// Response body returned by the remote API (a JSON object)
pub type ResponsePayload = serde_json::Map<String, serde_json::Value>;

/// One call to the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Remote operation name, e.g. `CreateInstance`
    pub action: String,
    pub payload: RequestPayload,
    /// Safe to send twice
    pub idempotent: bool,
    /// Fixed for the lifetime of a non-idempotent call, so the remote can
    /// deduplicate retries of it
    pub client_token: Option<String>,
}

impl RemoteCall {
    pub fn new(action: impl Into<String>, payload: RequestPayload) -> Self {
        Self {
            action: action.into(),
            payload,
            idempotent: true,
            client_token: None,
        }
    }

    /// A call that must not be applied twice (creates)
    pub fn non_idempotent(action: impl Into<String>, payload: RequestPayload) -> Self {
        Self {
            idempotent: false,
            client_token: Some(Uuid::new_v4().to_string()),
            ..Self::new(action, payload)
        }
    }
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)
    }
}

/// Remote API used by the orchestrator
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Invoke one remote action
    ///
    /// Implementations must classify every failure as retryable, fatal or
    /// not-found. A read for an ID that does not exist returns not-found.
    async fn invoke(&self, call: &RemoteCall) -> Result<ResponsePayload, RemoteError>;
}
