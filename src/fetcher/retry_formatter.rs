//! Retry message formatting for the resilient fetcher.
//!
//! Keeps retry, recovery and final-failure log lines consistent across every
//! endpoint an export touches.

use std::time::Duration;

use super::{FetcherError, TransportError};

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Per-call timeout elapsed
    NetworkTimeout,
    /// Connection refused, reset, or DNS failure
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                422 => "invalid request parameters",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Another integration may share this store's API quota; retry later",
            Self::ServerError(_) => "The store API may be experiencing issues, try again later",
            Self::AuthFailed(_) => "Verify the access token and that its scopes cover this resource",
            Self::ClientError(_) => "Check the store hash and request parameters",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::AuthFailed(_) | RetryErrorType::ClientError(_)
        )
    }

    /// Classify a fetcher failure.
    pub fn from_error(err: &FetcherError) -> Self {
        match err {
            FetcherError::RateLimited { .. } => Self::RateLimit,
            FetcherError::TransientServerError { status, .. } => Self::ServerError(*status),
            FetcherError::ClientRequestError { status, .. }
            | FetcherError::OptionalSubresourceUnavailable { status, .. } => {
                extract_error_type(Some(*status), None)
            }
            FetcherError::ExhaustedRetries { last, .. } => Self::from_error(last),
            FetcherError::NetworkTransientFailure(msg) => {
                if msg.starts_with("timeout") {
                    Self::NetworkTimeout
                } else {
                    Self::NetworkOffline
                }
            }
            _ => Self::NetworkGeneric,
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Original error message for details
    pub error_message: String,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.endpoint
        )
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded - resuming export ({})",
            self.attempt, self.max_attempts, self.endpoint
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Request failed after {} attempts",
            self.attempt
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or transport error.
pub fn extract_error_type(status: Option<u16>, err: Option<&TransportError>) -> RetryErrorType {
    if let Some(status) = status {
        match status {
            401 | 403 => return RetryErrorType::AuthFailed(status),
            429 => return RetryErrorType::RateLimit,
            500..=599 => return RetryErrorType::ServerError(status),
            400..=499 => return RetryErrorType::ClientError(status),
            _ => {}
        }
    }

    match err {
        Some(TransportError::Timeout(_)) => RetryErrorType::NetworkTimeout,
        Some(TransportError::Connect(_)) => RetryErrorType::NetworkOffline,
        _ => RetryErrorType::NetworkGeneric,
    }
}
