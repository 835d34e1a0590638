//! Export command implementation

use crate::export::{
    ExportConfig, ExportTable, Exporter, LoggingObserver, ProgressEvent, ProgressObserver,
};
use crate::export::config::{MAX_CONCURRENCY, MAX_PAGE_SIZE};
use crate::output::write_table_csv;
use crate::shutdown::SharedShutdown;
use crate::EntityKind;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::CliError;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Store Exporter CLI
#[derive(Parser, Debug)]
#[command(name = "store-exporter")]
#[command(about = "Export storefront products, customers or orders to a flat CSV table", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Store hash identifying the storefront
    #[arg(long, global = true, env = "STORE_HASH", hide_env_values = true)]
    pub store_hash: Option<String>,

    /// API access token
    #[arg(long, global = true, env = "STORE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// API host
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Attempts per request (range: 1-20; default depends on the entity)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,

    /// Parallel per-entity requests (default: 10, max: 32)
    #[arg(long, global = true, default_value = "10", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Listing page size (range: 1-250)
    #[arg(long, global = true, default_value_t = MAX_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..=250))]
    pub page_size: u32,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands, one per exportable entity
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export catalog products
    Products(ExportArgs),
    /// Export customers with addresses and attributes
    Customers(ExportArgs),
    /// Export orders with their line items
    Orders(ExportArgs),
}

impl Commands {
    /// Entity selected by the subcommand
    pub fn entity(&self) -> EntityKind {
        match self {
            Commands::Products(_) => EntityKind::Products,
            Commands::Customers(_) => EntityKind::Customers,
            Commands::Orders(_) => EntityKind::Orders,
        }
    }

    /// Per-export arguments
    pub fn args(&self) -> &ExportArgs {
        match self {
            Commands::Products(args) | Commands::Customers(args) | Commands::Orders(args) => args,
        }
    }
}

/// Arguments shared by every export subcommand
#[derive(Parser, Debug, Clone)]
pub struct ExportArgs {
    /// Output CSV path (defaults to a per-entity file name)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Outcome of a finished export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Entity exported
    pub entity: EntityKind,
    /// Output path, `None` when nothing was written
    pub output_path: Option<PathBuf>,
    /// Exported rows
    pub rows: usize,
    /// Table width
    pub columns: usize,
    /// Degraded-enrichment warnings
    pub warnings: Vec<String>,
}

impl Cli {
    /// Build the export configuration for `kind` from global flags
    pub fn export_config(&self, kind: EntityKind) -> Result<ExportConfig, CliError> {
        let mut builder = ExportConfig::builder(
            self.store_hash.clone().unwrap_or_default(),
            self.access_token.clone().unwrap_or_default(),
        )
        .for_entity(kind)
        .concurrency(self.concurrency)
        .page_size(self.page_size);

        if let Some(max_retries) = self.max_retries {
            builder = builder.max_attempts(max_retries);
        }
        if let Some(api_base) = &self.api_base {
            builder = builder.api_base(api_base.clone());
        }

        Ok(builder.build()?)
    }

    /// Run the selected export and report the result
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<ExportSummary, CliError> {
        let kind = self.command.entity();
        let config = Arc::new(self.export_config(kind)?);
        let output_path = self
            .command
            .args()
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(kind.default_output_file()));

        info!(
            entity = %kind,
            store = config.credentials.store_hash(),
            max_attempts = config.retry.max_attempts,
            concurrency = config.concurrency,
            "Starting export"
        );

        // JSON mode reports progress through the log instead of a bar
        let bar = (self.output_format == OutputFormat::Human).then(|| Arc::new(BarObserver::new(kind)));
        let observer: Arc<dyn ProgressObserver> = match &bar {
            Some(bar) => bar.clone() as Arc<dyn ProgressObserver>,
            None => Arc::new(LoggingObserver::new(kind)),
        };
        let exporter = Exporter::new(config)?
            .with_observer(observer)
            .with_shutdown(shutdown);

        let result = run_export(&exporter, kind, &output_path).await;
        if let Some(bar) = &bar {
            bar.finish();
        }

        match self.output_format {
            OutputFormat::Json => output_json(kind, &output_path, &result),
            OutputFormat::Human => output_human(kind, &result),
        }

        result
    }
}

async fn run_export(
    exporter: &Exporter,
    kind: EntityKind,
    output_path: &Path,
) -> Result<ExportSummary, CliError> {
    let table: ExportTable = exporter.export(kind).await?;
    for warning in &table.warnings {
        warn!(entity = %kind, "Enrichment degraded: {}", warning);
    }

    let written = write_table_csv(&table, output_path)?;
    Ok(ExportSummary {
        entity: kind,
        output_path: written.then(|| output_path.to_path_buf()),
        rows: table.len(),
        columns: table.columns.len(),
        warnings: table.warnings,
    })
}

/// Output result as JSON
fn output_json(kind: EntityKind, output_path: &Path, result: &Result<ExportSummary, CliError>) {
    let output = match result {
        Ok(summary) => serde_json::json!({
            "success": true,
            "entity": kind.as_str(),
            "output_path": summary.output_path.as_ref().map(|p| p.display().to_string()),
            "rows": summary.rows,
            "columns": summary.columns,
            "warnings": summary.warnings,
            "error": null,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "entity": kind.as_str(),
            "output_path": output_path.display().to_string(),
            "rows": 0,
            "columns": 0,
            "warnings": [],
            "error": { "kind": e.kind(), "message": e.to_string() },
        }),
    };

    println!("{output}");
}

/// Output result in human-readable format
fn output_human(kind: EntityKind, result: &Result<ExportSummary, CliError>) {
    match result {
        Ok(summary) => {
            match &summary.output_path {
                Some(path) => {
                    println!("\nExport completed successfully!");
                    println!("Output: {}", path.display());
                }
                None => println!("\nNo {kind} found, nothing written."),
            }
            println!("Exported {}: {}", kind, summary.rows);
            println!("Columns: {}", summary.columns);
            for warning in &summary.warnings {
                println!("Warning: {warning}");
            }
        }
        Err(e) => {
            eprintln!("\nExport of {kind} failed!");
            eprintln!("Error kind: {}", e.kind());
            eprintln!("Error: {e}");
            error!("Export failed: {}", e);
        }
    }
}

/// Progress bar fed by export events
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new(kind: EntityKind) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(bar_style());
        bar.set_message(format!("fetching {kind}"));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ProgressObserver for BarObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PageFetched {
                entity,
                page,
                items,
                total_hint,
            } => {
                if let Some(total) = total_hint {
                    self.bar.set_length(*total);
                }
                self.bar.inc(*items as u64);
                self.bar.set_message(format!("{entity} page {page}"));
            }
            ProgressEvent::EnrichmentBatch {
                resource,
                chunk,
                chunks,
                ..
            } => {
                self.bar
                    .set_message(format!("{resource} batch {chunk}/{chunks}"));
            }
            ProgressEvent::EnrichmentDegraded { resource, status } => {
                self.bar
                    .set_message(format!("{resource} unavailable ({status})"));
            }
            ProgressEvent::ParentEnriched {
                completed, total, ..
            } => {
                self.bar.set_length(*total as u64);
                self.bar.set_position(*completed as u64);
                self.bar.set_message("line items");
            }
            ProgressEvent::RecordsFlattened { count } => {
                self.bar.set_message(format!("flattened {count} records"));
            }
        }
    }
}
