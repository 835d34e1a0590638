//! # Store Exporter Library
//!
//! Bulk-extracts one entity collection from a paginated, rate-limited storefront
//! REST API and turns it into a flat table with a deterministic column layout.
//!
//! ## Features
//!
//! - **Resilient fetching**: 429/5xx/network failures absorbed with bounded exponential backoff
//! - **Two pagination styles**: `meta.pagination` envelopes and bare arrays with short-page termination
//! - **Enrichment**: truncated sub-resources re-fetched through batched id filters or a bounded fan-out
//! - **Flattening**: nested values serialized, designated sub-lists split into indexed columns
//! - **Stable schema**: column order is a pure function of the records, never of fetch timing
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use store_exporter::export::{ExportConfig, Exporter, NoopObserver};
//! use store_exporter::EntityKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExportConfig::builder("abc123", "secret-token")
//!     .for_entity(EntityKind::Customers)
//!     .build()?;
//!
//! let exporter = Exporter::new(Arc::new(config))?.with_observer(Arc::new(NoopObserver));
//! let table = exporter.export(EntityKind::Customers).await?;
//! println!("{} rows, {} columns", table.rows.len(), table.columns.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - transport seam, resilient retries, page walking
//! - [`export`] - configuration, enrichment and per-entity pipelines
//! - [`flatten`] - record flattening and schema unification
//! - [`registry`] - static per-entity profiles (endpoints, split groups, back columns)
//! - [`output`] - CSV table writer
//! - [`cli`] - command line surface

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Export configuration, enrichment and orchestration
pub mod export;

/// HTTP fetching, retries and pagination
pub mod fetcher;

/// Record flattening and column unification
pub mod flatten;

/// Request and export metrics
pub mod metrics;

/// Table output writers
pub mod output;

/// Static per-entity export profiles
pub mod registry;

/// Cooperative cancellation shared by worker pools
pub mod shutdown;

/// One upstream entity as received: an ordered field map of dynamic values
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A flattened record: every value is a scalar or already-serialized text
pub type FlatRecord = serde_json::Map<String, serde_json::Value>;

/// Entity collections that can be exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Catalog items
    Products,
    /// Customer profiles with addresses and attributes
    Customers,
    /// Orders with per-order line items
    Orders,
}

impl EntityKind {
    /// All exportable kinds
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Products,
        EntityKind::Customers,
        EntityKind::Orders,
    ];

    /// Lowercase plural label ("products", ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Customers => "customers",
            EntityKind::Orders => "orders",
        }
    }

    /// Lowercase singular label used for progress units
    pub fn singular(&self) -> &'static str {
        match self {
            EntityKind::Products => "product",
            EntityKind::Customers => "customer",
            EntityKind::Orders => "order",
        }
    }

    /// Default CSV file name for this kind
    pub fn default_output_file(&self) -> &'static str {
        match self {
            EntityKind::Products => "bigcommerce_catalog_products.csv",
            EntityKind::Customers => "bigcommerce_customers.csv",
            EntityKind::Orders => "bigcommerce_orders_v2.csv",
        }
    }

    /// Default retry budget; customer exports issue many more calls per row
    pub fn default_max_attempts(&self) -> u32 {
        match self {
            EntityKind::Customers => 20,
            EntityKind::Products | EntityKind::Orders => 8,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "products" | "catalog" => Ok(EntityKind::Products),
            "customers" => Ok(EntityKind::Customers),
            "orders" => Ok(EntityKind::Orders),
            _ => Err(format!(
                "Invalid entity kind: {s}. Valid options: products, customers, orders"
            )),
        }
    }
}

/// Parse an entity identifier out of a JSON value (number or numeric string)
pub fn entity_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
