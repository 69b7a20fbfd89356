//! HTTP remote error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpRemoteError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HttpRemoteError>;
