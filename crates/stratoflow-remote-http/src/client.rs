//! HTTP implementation of [`RemoteApi`]

use crate::envelope::parse_response;
use crate::error::{HttpRemoteError, Result};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use std::time::Duration;
use stratoflow_engine::{RemoteApi, RemoteCall, RemoteError, ResponsePayload};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpRemote`]
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL; actions are posted to `{endpoint}/{Action}`
    pub endpoint: String,
    pub region: String,
    pub token: String,
    pub requests_per_second: u32,
}

/// JSON-over-HTTPS remote API client
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    token: String,
    limiter: RateLimiter,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(HttpRemoteError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                config.endpoint
            )));
        }
        if config.token.is_empty() {
            return Err(HttpRemoteError::InvalidConfig(
                "API token is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("stratoflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            region: config.region,
            token: config.token,
            limiter: RateLimiter::new(config.requests_per_second),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, action: &str) -> String {
        format!("{}/{}", self.endpoint, action)
    }
}

/// Transport failures: timeouts and connection problems are worth retrying
fn transport_error(action: &str, e: reqwest::Error) -> RemoteError {
    let message = format!("{}: {}", action, e);
    if e.is_timeout() || e.is_connect() {
        RemoteError::retryable(message)
    } else {
        RemoteError::fatal(message)
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn invoke(&self, call: &RemoteCall) -> std::result::Result<ResponsePayload, RemoteError> {
        if !self.limiter.try_acquire(&call.action) {
            tracing::debug!("{} throttled client-side", call.action);
            return Err(RemoteError::retryable(format!(
                "{} exceeds {} requests/s",
                call.action,
                self.limiter.per_second()
            ))
            .with_code("RateLimited"));
        }

        let mut request = self
            .client
            .post(self.url(&call.action))
            .bearer_auth(&self.token)
            .header("X-Region", &self.region)
            .json(&call.payload);
        if let Some(token) = &call.client_token {
            request = request.header("X-Client-Token", token);
        }

        tracing::debug!("POST {}", self.url(&call.action));
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&call.action, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&call.action, e))?;

        parse_response(status, &body)
    }
}
