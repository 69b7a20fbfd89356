//! Engine error types
//!
//! Remote failures arrive pre-classified as [`RemoteError`]. The engine turns
//! them into [`EngineError`] variants and wraps phase failures with enough
//! context (address, phase, last call) for a caller to decide what to do next.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a remote failure must be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient failure (throttling, temporary unavailability)
    Retryable,
    /// Permanent rejection
    Fatal,
    /// The addressed resource does not exist
    NotFound,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::NotFound => write!(f, "not-found"),
        }
    }
}

/// A classified error returned by a remote API collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} remote error{}: {message}", .code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
pub struct RemoteError {
    pub class: ErrorClass,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Retryable,
            code: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Fatal,
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::NotFound,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }

    pub fn is_not_found(&self) -> bool {
        self.class == ErrorClass::NotFound
    }
}

/// Reconciliation phase, used for error context and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refresh,
    Create,
    Update,
    Delete,
    Poll,
    Import,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Refresh => write!(f, "refresh"),
            Phase::Create => write!(f, "create"),
            Phase::Update => write!(f, "update"),
            Phase::Delete => write!(f, "delete"),
            Phase::Poll => write!(f, "poll"),
            Phase::Import => write!(f, "import"),
        }
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Deadline exceeded after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    DeadlineExceeded {
        elapsed: Duration,
        attempts: u32,
        last_error: String,
    },

    #[error("{phase} of {address} failed{}: {source}", .last_call.as_ref().map(|c| format!(" (last call: {c})")).unwrap_or_default())]
    Phase {
        address: String,
        phase: Phase,
        last_call: Option<String>,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Reconciliation of {address} cancelled during {phase}")]
    Cancelled { address: String, phase: Phase },

    #[error("Interrupted by cancellation")]
    Interrupted,

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn in_phase(
        self,
        address: impl Into<String>,
        phase: Phase,
        last_call: Option<&str>,
    ) -> Self {
        match self {
            // Already carries its own context
            e @ (EngineError::Phase { .. }
            | EngineError::Cancelled { .. }
            | EngineError::Interrupted) => e,
            e => EngineError::Phase {
                address: address.into(),
                phase,
                last_call: last_call.map(str::to_string),
                source: Box::new(e),
            },
        }
    }

    /// Whether the innermost cause is a deadline expiry
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            EngineError::DeadlineExceeded { .. } => true,
            EngineError::Phase { source, .. } => source.is_deadline_exceeded(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. } | EngineError::Interrupted)
    }

    /// The classified remote error at the root of this failure, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            EngineError::Remote(e) => Some(e),
            EngineError::Phase { source, .. } => source.remote(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
