//! Export orchestration
//!
//! This module turns one entity listing into a unified table.
//!
//! # Overview
//!
//! 1. **Configuration**: build an immutable [`config::ExportConfig`] once per run
//! 2. **Walking**: [`crate::fetcher::PageWalker`] pulls the listing page by page
//! 3. **Enrichment**: [`enrichment::EnrichmentOrchestrator`] re-fetches truncated sub-resources
//! 4. **Flattening**: [`crate::flatten::RecordFlattener`] and [`crate::flatten::SchemaUnifier`]
//!    produce the final columns and rows
//!
//! [`executor::Exporter`] wires these together for each [`crate::EntityKind`].
//!
//! # Error Handling
//!
//! All operations return `Result<T, ExportError>`. Retryable upstream failures never
//! reach this layer unless the retry budget ran out; everything that does is fatal
//! and no partial table is produced.

pub mod config;
pub mod enrichment;
pub mod executor;
pub mod progress;

pub use config::{ApiCredentials, ExportConfig, ExportConfigBuilder, RetryPolicy};
pub use enrichment::{Availability, EnrichmentOrchestrator, SubResource};
pub use executor::{ExportTable, Exporter};
pub use progress::{LoggingObserver, NoopObserver, ProgressEvent, ProgressObserver};

use crate::fetcher::FetcherError;

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Fatal upstream failure
    #[error(transparent)]
    Fetch(#[from] FetcherError),

    /// Shutdown was requested before the run finished
    #[error("export cancelled")]
    Cancelled,

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ExportError {
    /// Taxonomy name used in user-facing failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(err) => err.kind(),
            Self::Cancelled => "Cancelled",
            Self::Configuration(_) => "Configuration",
        }
    }
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;
