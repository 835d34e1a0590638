//! CLI error types and conversions

use crate::export::ExportError;
use crate::output::OutputError;

/// Top-level CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Export pipeline error
    #[error("export error: {0}")]
    ExportError(#[from] ExportError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),
}

impl CliError {
    /// Stable kind label for reports
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::ExportError(err) => err.kind(),
            CliError::OutputError(_) => "OutputError",
        }
    }
}
