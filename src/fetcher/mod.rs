//! Fetch layer: transport seam, resilient retries, and page walking
//!
//! Every request in an export goes through [`resilient::ResilientFetcher`], which
//! absorbs rate limits, 5xx responses and network hiccups. [`pagination::PageWalker`]
//! drives it across the pages of one listing endpoint.

use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod pagination;
pub mod resilient;
pub mod retry_formatter;

pub use http::ReqwestTransport;
pub use pagination::{Page, PageWalker};
pub use resilient::ResilientFetcher;

/// Longest response body excerpt kept inside errors
const BODY_EXCERPT_LEN: usize = 512;

/// Fetcher errors
///
/// `RateLimited`, `TransientServerError` and `NetworkTransientFailure` are retryable
/// and only ever surface wrapped inside `ExhaustedRetries`.
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// HTTP 429
    #[error("rate limited (HTTP 429): {body}")]
    RateLimited {
        /// Delay requested by the server, if it sent a numeric `Retry-After`
        retry_after: Option<Duration>,
        /// Response body excerpt
        body: String,
    },

    /// HTTP 5xx
    #[error("server error (HTTP {status}): {body}")]
    TransientServerError {
        /// Status code
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Timeout, connection refused or reset
    #[error("network failure: {0}")]
    NetworkTransientFailure(String),

    /// Retry budget consumed
    #[error("retries exhausted after {attempts} attempts for {url}: {last}")]
    ExhaustedRetries {
        /// Request URL
        url: String,
        /// Attempts performed
        attempts: u32,
        /// Last observed failure
        last: Box<FetcherError>,
    },

    /// Upstream broke its response contract
    #[error("unexpected response shape from {url}: {detail}")]
    UnexpectedResponseShape {
        /// Request URL
        url: String,
        /// What was wrong with the body
        detail: String,
    },

    /// A best-effort sub-resource answered 403/404
    #[error("optional sub-resource '{resource}' unavailable (HTTP {status})")]
    OptionalSubresourceUnavailable {
        /// Sub-resource name
        resource: String,
        /// Status code (403 or 404)
        status: u16,
    },

    /// Any 4xx other than 429
    #[error("client error (HTTP {status}) for {url}: {body}")]
    ClientRequestError {
        /// Request URL
        url: String,
        /// Status code
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Request could not be built or sent for a non-transient reason
    #[error("transport error: {0}")]
    Transport(String),

    /// Pagination safety bound hit
    #[error("page limit ({max_pages}) exceeded for {url}")]
    PageLimitExceeded {
        /// Listing URL
        url: String,
        /// Configured bound
        max_pages: u32,
    },
}

impl FetcherError {
    /// Taxonomy name used in user-facing failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RateLimited",
            Self::TransientServerError { .. } => "TransientServerError",
            Self::NetworkTransientFailure(_) => "NetworkTransientFailure",
            Self::ExhaustedRetries { .. } => "ExhaustedRetries",
            Self::UnexpectedResponseShape { .. } => "UnexpectedResponseShape",
            Self::OptionalSubresourceUnavailable { .. } => "OptionalSubresourceUnavailable",
            Self::ClientRequestError { .. } => "ClientRequestError",
            Self::Transport(_) => "Transport",
            Self::PageLimitExceeded { .. } => "PageLimitExceeded",
        }
    }

    /// Whether the retry loop may try again after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::TransientServerError { .. }
                | Self::NetworkTransientFailure(_)
        )
    }

    /// HTTP status attached to this failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::TransientServerError { status, .. } | Self::ClientRequestError { status, .. } => {
                Some(*status)
            }
            Self::OptionalSubresourceUnavailable { status, .. } => Some(*status),
            Self::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One logical GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Absolute URL without query string
    pub url: String,
    /// Header pairs sent verbatim
    pub headers: Vec<(String, String)>,
    /// Query parameters
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Request with no headers or query
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Attach headers
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the query
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Set or replace one query parameter
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query.push((key.to_string(), value)),
        }
    }

    /// Look up a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully-read HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Status code
    pub status: u16,
    /// Headers with lowercased names
    pub headers: Vec<(String, String)>,
    /// Body text
    pub body: String,
}

impl ApiResponse {
    /// Build a response; header names are normalized to lowercase
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body: body.into(),
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// True for 204 or a blank body
    pub fn is_empty_body(&self) -> bool {
        self.status == 204 || self.body.trim().is_empty()
    }

    /// Short body excerpt for error messages
    pub fn body_excerpt(&self) -> String {
        excerpt(&self.body)
    }

    /// Decode the body as JSON; `None` when the body is empty
    pub fn json(&self, url: &str) -> FetcherResult<Option<serde_json::Value>> {
        if self.is_empty_body() {
            return Ok(None);
        }
        serde_json::from_str(&self.body)
            .map(Some)
            .map_err(|e| FetcherError::UnexpectedResponseShape {
                url: url.to_string(),
                detail: format!("invalid JSON ({e}): {}", self.body_excerpt()),
            })
    }
}

pub(crate) fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Transport-level failures, before any HTTP status exists
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Per-call timeout elapsed
    #[error("timeout: {0}")]
    Timeout(String),
    /// Connection refused, reset or DNS failure
    #[error("connection failed: {0}")]
    Connect(String),
    /// Anything else (malformed URL, TLS setup, ...)
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts and connection failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }
}

/// Sends one HTTP GET and reads the whole response
///
/// The production implementation is [`ReqwestTransport`]; tests plug in scripted ones.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a single attempt of `request`
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}
