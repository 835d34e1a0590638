//! reqwest-backed transport
//!
//! One shared [`reqwest::Client`] per run, configured with explicit timeouts so no
//! call can hang indefinitely:
//! - Connect timeout: 10 seconds
//! - Request timeout: 60 seconds

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::export::config::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};

/// Production [`Transport`] over a pooled reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with default timeouts
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Build a client with explicit timeouts
    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .user_agent(concat!("store-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TransportError::Other(format!(
                    "Failed to build HTTP client: {e}. Check system TLS configuration."
                ))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            "Making GET request to: {} with {} params",
            request.url,
            request.query.len()
        );

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(classify)?;

        Ok(ApiResponse::new(status, headers, body))
    }
}

/// Map a reqwest error onto the transient/non-transient split
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_body() || err.is_decode() {
        // A body cut off mid-stream is as transient as a reset connection
        TransportError::Connect(err.to_string())
    } else if err.is_request() && err.url().is_some() && !err.is_builder() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
