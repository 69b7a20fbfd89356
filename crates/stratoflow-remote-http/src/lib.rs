//! HTTP remote API client for StratoFlow
//!
//! Implements the engine's [`stratoflow_engine::RemoteApi`] over
//! JSON-over-HTTPS. Every action is a `POST {endpoint}/{Action}` with a
//! JSON body; responses come wrapped in a `Response` envelope.
//!
//! # Example
//!
//! ```ignore
//! use stratoflow_remote_http::{HttpRemote, HttpRemoteConfig};
//!
//! let remote = HttpRemote::new(HttpRemoteConfig {
//!     endpoint: "https://api.example.com".to_string(),
//!     region: "ap-tokyo".to_string(),
//!     token: std::env::var("STRATOFLOW_API_TOKEN")?,
//!     requests_per_second: 20,
//! })?;
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod rate_limit;

pub use client::{HttpRemote, HttpRemoteConfig};
pub use envelope::{classify, parse_response};
pub use error::{HttpRemoteError, Result};
pub use rate_limit::RateLimiter;
