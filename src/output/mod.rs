//! Table output writers

use std::path::Path;

use crate::export::ExportTable;

pub mod csv;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Row does not match the header
    #[error("row has {actual} cells, header has {expected}")]
    RowWidthMismatch {
        /// Header width
        expected: usize,
        /// Row width
        actual: usize,
    },

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output
    fn close(self) -> OutputResult<()>;
}

/// Trait for writing unified table rows
pub trait TableWriter: OutputWriter {
    /// Write one row; must match the header width
    fn write_row(&mut self, row: &[String]) -> OutputResult<()>;

    /// Write multiple rows at once
    fn write_rows(&mut self, rows: &[Vec<String>]) -> OutputResult<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }
}

/// Write `table` to `path` as CSV
///
/// Returns `false` without touching the filesystem when the table has no rows.
pub fn write_table_csv<P: AsRef<Path>>(table: &ExportTable, path: P) -> OutputResult<bool> {
    if table.is_empty() {
        return Ok(false);
    }
    let mut writer = csv::CsvTableWriter::new(path, &table.columns)?;
    writer.write_rows(&table.rows)?;
    writer.close()?;
    Ok(true)
}
