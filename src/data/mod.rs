//! Persistence of measurement rows.

pub mod storage;

pub use storage::{CsvLogWriter, CSV_HEADER};
