//! Export configuration
//!
//! [`ExportConfig`] is built once per run and shared read-only by every component.

use rand::Rng;
use std::fmt;
use std::time::Duration;

use crate::EntityKind;

use super::ExportError;

/// Default API host
pub const DEFAULT_API_BASE: &str = "https://api.bigcommerce.com";

/// Largest page size the listing endpoints accept
pub const MAX_PAGE_SIZE: u32 = 250;

/// Default retry budget when no entity-specific one applies
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Upper bound accepted for the retry budget
pub const MAX_ATTEMPTS_LIMIT: u32 = 20;

/// First backoff delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Backoff cap in milliseconds, also applied to server-provided `Retry-After`
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Random jitter added on top of the exponential delay, as a fraction of it
pub const JITTER_RATIO: f64 = 0.25;

/// Identifiers per `:in` filter request
pub const ID_CHUNK_SIZE: usize = 50;

/// Fan-out worker count
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Upper bound for fan-out workers
pub const MAX_CONCURRENCY: usize = 32;

/// Split-group cap for addresses and attributes
pub const MAX_SPLIT_ITEMS: usize = 50;

/// TCP connect timeout (seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whole-request timeout (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Pagination safety bound
pub const MAX_PAGES: u32 = 10_000;

/// Retry schedule for one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_backoff: Duration,
    /// Cap for any single delay
    pub max_backoff: Duration,
    /// Jitter fraction in `[0, 1]`
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_ratio: JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before attempt `attempt + 1`, without jitter
    ///
    /// `attempt` is 1-based: the delay after the first failure is `base_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2u32.pow(exponent);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay with random jitter of up to `jitter_ratio`, capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=ratio);
        base.mul_f64(1.0 + jitter).min(self.max_backoff)
    }

    /// Honour a server-provided `Retry-After` exactly; `max_backoff` only bounds the exponential delay
    pub fn retry_after(&self, requested: Duration) -> Duration {
        requested
    }
}

/// Store credentials; the token is never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    store_hash: String,
    access_token: String,
}

impl ApiCredentials {
    /// Build credentials, rejecting blank values
    pub fn new(store_hash: impl Into<String>, access_token: impl Into<String>) -> Result<Self, ExportError> {
        let store_hash = store_hash.into().trim().to_string();
        let access_token = access_token.into().trim().to_string();
        if store_hash.is_empty() || access_token.is_empty() {
            return Err(ExportError::Configuration(
                "store hash and access token are required".to_string(),
            ));
        }
        Ok(Self {
            store_hash,
            access_token,
        })
    }

    /// Store identifier
    pub fn store_hash(&self) -> &str {
        &self.store_hash
    }

    /// Static header set sent with every request
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("X-Auth-Token".to_string(), self.access_token.clone()),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("store_hash", &self.store_hash)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Immutable configuration for one export run
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Store credentials
    pub credentials: ApiCredentials,
    /// API host, without trailing slash
    pub api_base: String,
    /// Requested page size (1..=250)
    pub page_size: u32,
    /// Retry schedule for every request
    pub retry: RetryPolicy,
    /// Identifiers per batched filter request
    pub id_chunk_size: usize,
    /// Fan-out worker count
    pub concurrency: usize,
    /// Split cap for address columns
    pub max_addresses: usize,
    /// Split cap for attribute columns
    pub max_attributes: usize,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// Pagination safety bound
    pub max_pages: u32,
}

impl ExportConfig {
    /// Start a builder with defaults
    pub fn builder(store_hash: impl Into<String>, access_token: impl Into<String>) -> ExportConfigBuilder {
        ExportConfigBuilder::new(store_hash.into(), access_token.into())
    }

    /// Absolute URL for a store-relative path such as `v3/customers`
    pub fn store_url(&self, path: &str) -> String {
        format!(
            "{}/stores/{}/{}",
            self.api_base,
            self.credentials.store_hash(),
            path.trim_start_matches('/')
        )
    }

    /// Credential headers for every request
    pub fn headers(&self) -> Vec<(String, String)> {
        self.credentials.headers()
    }
}

/// Builder for [`ExportConfig`]
#[derive(Debug, Clone)]
pub struct ExportConfigBuilder {
    store_hash: String,
    access_token: String,
    api_base: String,
    page_size: u32,
    retry: RetryPolicy,
    id_chunk_size: usize,
    concurrency: usize,
    max_addresses: usize,
    max_attributes: usize,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_pages: u32,
}

impl ExportConfigBuilder {
    fn new(store_hash: String, access_token: String) -> Self {
        Self {
            store_hash,
            access_token,
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: MAX_PAGE_SIZE,
            retry: RetryPolicy::default(),
            id_chunk_size: ID_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_addresses: MAX_SPLIT_ITEMS,
            max_attributes: MAX_SPLIT_ITEMS,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            max_pages: MAX_PAGES,
        }
    }

    /// Apply the retry budget appropriate for `kind`
    pub fn for_entity(mut self, kind: EntityKind) -> Self {
        self.retry.max_attempts = kind.default_max_attempts();
        self
    }

    /// Override the API host
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Page size; clamped to `1..=250`
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Total attempts per request
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Replace the whole retry policy
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Identifiers per batched filter request
    pub fn id_chunk_size(mut self, size: usize) -> Self {
        self.id_chunk_size = size;
        self
    }

    /// Fan-out worker count
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Split caps for address and attribute columns
    pub fn split_caps(mut self, max_addresses: usize, max_attributes: usize) -> Self {
        self.max_addresses = max_addresses;
        self.max_attributes = max_attributes;
        self
    }

    /// Per-call timeouts
    pub fn timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Pagination safety bound
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<ExportConfig, ExportError> {
        let credentials = ApiCredentials::new(self.store_hash, self.access_token)?;

        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ExportError::Configuration(format!(
                "max attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {}",
                self.retry.max_attempts
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ExportError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.id_chunk_size == 0 {
            return Err(ExportError::Configuration(
                "id chunk size must be at least 1".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ExportError::Configuration(
                "max pages must be at least 1".to_string(),
            ));
        }
        if self.api_base.is_empty() {
            return Err(ExportError::Configuration("API base URL is empty".to_string()));
        }

        Ok(ExportConfig {
            credentials,
            api_base: self.api_base,
            page_size: self.page_size,
            retry: self.retry,
            id_chunk_size: self.id_chunk_size,
            concurrency: self.concurrency,
            max_addresses: self.max_addresses,
            max_attributes: self.max_attributes,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            max_pages: self.max_pages,
        })
    }
}
