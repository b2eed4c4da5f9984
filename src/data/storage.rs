//! CSV measurement log writer.
//!
//! One file per writer, excel dialect (CRLF terminators, minimal quoting), a fixed
//! four-column header written at creation, and a flush plus `sync_data` after
//! every row so that a crash or power cut loses at most the pass in flight.

use crate::{error::AppResult, measurement::MeasurementRow};
use log::{debug, info};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Column names of every log file.
pub const CSV_HEADER: [&str; 4] = ["timestamp", "instrument 1", "instrument 2", "instrument 3"];

/// Appends measurement rows to a CSV file.
pub struct CsvLogWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLogWriter {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        info!("CSV log writer initialized at '{}'.", path.display());
        Ok(Self { path, writer })
    }

    /// Path this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and sync it to disk.
    pub fn write(&mut self, row: &MeasurementRow) -> AppResult<()> {
        let timestamp = row.timestamp.to_string();
        let [first, second, third] = &row.readings;
        self.writer
            .write_record([timestamp.as_str(), first.as_str(), second.as_str(), third.as_str()])?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        debug!("Row written and synced to '{}'", self.path.display());
        Ok(())
    }

    /// Flush and release the file.
    pub fn close(mut self) -> AppResult<()> {
        self.writer.flush()?;
        info!("CSV log writer '{}' closed.", self.path.display());
        Ok(())
    }
}
