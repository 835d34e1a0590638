//! Resilient single-request fetching
//!
//! Retries on:
//! - 429 rate limit errors (numeric `Retry-After` honoured exactly, else backoff)
//! - 5xx server errors
//! - Network errors (timeout, connection refused/reset)
//!
//! Does not retry on:
//! - 4xx client errors (except 429)
//! - Successful responses
//!
//! Attempt counters are local to each logical request; nothing is shared across calls.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::retry_formatter::{RetryContext, RetryErrorType};
use super::{excerpt, ApiRequest, ApiResponse, FetcherError, FetcherResult, Transport};
use crate::export::config::RetryPolicy;
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};

/// Issues one logical request, absorbing transient failures within a retry budget
#[derive(Clone)]
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl ResilientFetcher {
    /// Create a fetcher over `transport` with the given retry schedule
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Configured attempt budget
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    /// Execute `request` until it succeeds, fails fatally, or the budget runs out
    ///
    /// # Errors
    /// - `ClientRequestError` immediately for 4xx other than 429
    /// - `ExhaustedRetries` after `max_attempts` consecutive retryable failures
    /// - `Transport` for request failures that are not worth retrying
    pub async fn fetch(&self, request: &ApiRequest) -> FetcherResult<ApiResponse> {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let metrics = HttpRequestMetrics::start(&request.url, attempt);

            let failure = match self.transport.send(request).await {
                Ok(response) => {
                    metrics.record_complete(response.status);
                    match classify_response(&request.url, response) {
                        Ok(response) => {
                            if attempt > 1 {
                                info!(
                                    "{}",
                                    RetryContext::new(
                                        attempt,
                                        max_attempts,
                                        RetryErrorType::NetworkGeneric,
                                        Duration::ZERO,
                                        "",
                                        &request.url
                                    )
                                    .format_success()
                                );
                            } else {
                                debug!("Request succeeded on attempt {}", attempt);
                            }
                            return Ok(response);
                        }
                        Err(err) if err.is_retryable() => err,
                        Err(err) => return Err(err),
                    }
                }
                Err(err) if err.is_transient() => {
                    metrics.record_network_error();
                    FetcherError::NetworkTransientFailure(err.to_string())
                }
                Err(err) => {
                    metrics.record_network_error();
                    return Err(FetcherError::Transport(err.to_string()));
                }
            };

            let error_type = RetryErrorType::from_error(&failure);

            if attempt >= max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    error_type,
                    Duration::ZERO,
                    failure.to_string(),
                    &request.url,
                );
                error!("{}", ctx.format_failure());
                return Err(FetcherError::ExhaustedRetries {
                    url: request.url.clone(),
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            let delay = match &failure {
                FetcherError::RateLimited {
                    retry_after: Some(requested),
                    ..
                } => self.policy.retry_after(*requested),
                _ => self.policy.backoff(attempt),
            };

            let ctx = RetryContext::new(
                attempt,
                max_attempts,
                error_type,
                delay,
                failure.to_string(),
                &request.url,
            );
            warn!(attempt, status = ?failure.status(), "{}", ctx.format_retry());
            record_retry_backoff(delay, attempt);

            tokio::time::sleep(delay).await;
        }
    }

    /// Fetch and decode a JSON body; `None` for 204/empty bodies
    pub async fn fetch_json(&self, request: &ApiRequest) -> FetcherResult<(Option<Value>, ApiResponse)> {
        let response = self.fetch(request).await?;
        let body = response.json(&request.url)?;
        Ok((body, response))
    }

    /// Fetch an endpoint that must answer with a JSON array (empty body = empty list)
    pub async fn fetch_array(&self, request: &ApiRequest) -> FetcherResult<Vec<Value>> {
        match self.fetch_json(request).await?.0 {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(FetcherError::UnexpectedResponseShape {
                url: request.url.clone(),
                detail: format!("expected a JSON array, got {}", json_type_name(&other)),
            }),
        }
    }
}

/// Sort a response into success, retryable failure, or fatal failure
fn classify_response(url: &str, response: ApiResponse) -> FetcherResult<ApiResponse> {
    match response.status {
        200..=299 => Ok(response),
        429 => Err(FetcherError::RateLimited {
            retry_after: response.header("retry-after").and_then(parse_retry_after),
            body: response.body_excerpt(),
        }),
        500..=599 => Err(FetcherError::TransientServerError {
            status: response.status,
            body: response.body_excerpt(),
        }),
        400..=499 => Err(FetcherError::ClientRequestError {
            url: url.to_string(),
            status: response.status,
            body: response.body_excerpt(),
        }),
        other => Err(FetcherError::UnexpectedResponseShape {
            url: url.to_string(),
            detail: format!("unexpected HTTP status {other}: {}", excerpt(&response.body)),
        }),
    }
}

/// Parse a numeric `Retry-After` value in seconds
///
/// HTTP-date values and garbage yield `None`, which falls back to exponential backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
