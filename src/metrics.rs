//! Observability metrics for store exports
//!
//! This module records request outcomes, retry behavior, degraded enrichment and
//! export results.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)
//! - Without an installed recorder every macro is a no-op

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind the Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the store API"
    );

    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit errors received"
    );

    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "enrichment_degraded_total",
        Unit::Count,
        "Optional sub-resources that answered 403/404 and were skipped"
    );

    describe_counter!(
        "exports_completed_total",
        Unit::Count,
        "Total number of successful exports"
    );

    describe_counter!(
        "exports_failed_total",
        Unit::Count,
        "Total number of failed exports"
    );

    describe_counter!(
        "rows_exported_total",
        Unit::Count,
        "Rows produced by successful exports"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Low-cardinality endpoint label: store prefix dropped, numeric path segments masked
///
/// `https://api.bigcommerce.com/stores/abc/v2/orders/17/products` → `v2/orders/:id/products`
pub fn endpoint_label(url: &str) -> String {
    let path = url.split_once("/stores/").map_or(url, |(_, rest)| {
        rest.split_once('/').map_or(rest, |(_, path)| path)
    });
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(url: &str, attempt: u32) -> Self {
        let endpoint = endpoint_label(url);
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting HTTP request metrics"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!(
                "http_429_errors_total",
                "endpoint" => self.endpoint.clone(),
            )
            .increment(1);

            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                attempt = self.attempt,
                duration_ms = duration.as_millis(),
                "Rate limit error (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record an optional sub-resource skipped after 403/404
pub fn record_enrichment_degraded(resource: &str, status: u16) {
    counter!(
        "enrichment_degraded_total",
        "resource" => resource.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Export run metrics
pub struct ExportMetrics {
    entity: String,
    start_time: Instant,
}

impl ExportMetrics {
    /// Start tracking an export run
    pub fn start(entity: impl Into<String>) -> Self {
        let entity = entity.into();

        info!(entity = %entity, "Export started");

        Self {
            entity,
            start_time: Instant::now(),
        }
    }

    /// Record successful export completion
    pub fn record_success(&self, rows: u64) {
        let duration = self.start_time.elapsed();

        counter!(
            "exports_completed_total",
            "entity" => self.entity.clone(),
        )
        .increment(1);

        counter!(
            "rows_exported_total",
            "entity" => self.entity.clone(),
        )
        .increment(rows);

        info!(
            entity = %self.entity,
            rows = rows,
            duration_secs = duration.as_secs(),
            "Export completed successfully"
        );
    }

    /// Record failed export
    pub fn record_failure(&self, kind: &str, error: &str) {
        let duration = self.start_time.elapsed();

        counter!(
            "exports_failed_total",
            "entity" => self.entity.clone(),
            "kind" => kind.to_string(),
        )
        .increment(1);

        error!(
            entity = %self.entity,
            kind = %kind,
            error = %error,
            duration_secs = duration.as_secs(),
            "Export failed"
        );
    }
}
