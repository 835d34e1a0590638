//! CSV output writer implementation

use csv::Writer;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use super::{OutputError, OutputResult, OutputWriter, TableWriter};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Rows between periodic flushes
const FLUSH_INTERVAL_ROWS: u64 = 1000;

/// CSV writer for a unified export table
pub struct CsvTableWriter {
    writer: Writer<BufWriter<File>>,
    columns: usize,
    rows_written: u64,
}

impl CsvTableWriter {
    /// Create the file and write the header row
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `header` - Column names in output order
    pub fn new<P: AsRef<Path>>(path: P, header: &[String]) -> OutputResult<Self> {
        Self::new_with_buffer_size(path, header, DEFAULT_BUFFER_SIZE)
    }

    /// Create the writer with a custom buffer size
    pub fn new_with_buffer_size<P: AsRef<Path>>(
        path: P,
        header: &[String],
        buffer_size: usize,
    ) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating CSV writer: path={}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
            }
        }

        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;

        let buf_writer = BufWriter::with_capacity(buffer_size, file);
        let mut writer = Writer::from_writer(buf_writer);
        writer
            .write_record(header)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;

        debug!("CSV header written: {} columns", header.len());

        Ok(Self {
            writer,
            columns: header.len(),
            rows_written: 0,
        })
    }

    /// Get number of rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl TableWriter for CsvTableWriter {
    fn write_row(&mut self, row: &[String]) -> OutputResult<()> {
        if row.len() != self.columns {
            return Err(OutputError::RowWidthMismatch {
                expected: self.columns,
                actual: row.len(),
            });
        }

        self.writer
            .write_record(row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {e}")))?;

        self.rows_written += 1;

        if self.rows_written % FLUSH_INTERVAL_ROWS == 0 {
            self.flush()?;
            debug!("Progress: {} rows written", self.rows_written);
        }

        Ok(())
    }
}

impl OutputWriter for CsvTableWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn close(mut self) -> OutputResult<()> {
        debug!("Closing CSV writer: {} total rows written", self.rows_written);

        self.flush()?;

        let buf_writer = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;

        let file = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;

        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;

        info!("CSV writer closed successfully: {} rows written", self.rows_written);
        Ok(())
    }
}
