//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single place for everything that can
//! go wrong, from a bad slot number typed into the UI to a bridge that never
//! answers.
//!
//! ## Error Hierarchy
//!
//! - **Configuration errors** (`InvalidSlot`, `InvalidAddress`, `InvalidInterval`,
//!   `Configuration`, `Config`): raised synchronously at the call site.
//! - **Discovery failure** (`ControllerNotFound`): no bridge controller answered the
//!   identification probe. Fatal to the polling worker.
//! - **Per-instrument faults** (`Timeout`, `Serial`, `MalformedReading`,
//!   `OutOfRange`): contained to one column of one pass by the worker.
//! - **Log writer faults** (`Io`, `Csv`): propagated to whoever asked for the write.
//!
//! By using `#[from]`, `LoggerError` can be created from the underlying error types
//! with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LoggerError>;

/// Every failure the logger can report.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is semantically wrong.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Slot numbers are 1, 2 or 3.
    #[error("Invalid instrument slot {0}, expected 1, 2 or 3")]
    InvalidSlot(usize),

    /// Device initialization was asked to talk to a non-positive address.
    #[error("Invalid GPIB address '{0}'")]
    InvalidAddress(i32),

    /// Interval text that is not a number.
    #[error("Invalid update interval '{0}'")]
    InvalidInterval(String),

    /// No enumerable resource answered the identification probe.
    #[error("No Prologix controller found")]
    ControllerNotFound,

    /// The bridge connection has not been established yet.
    #[error("Bridge controller not connected")]
    NotConnected,

    /// The device did not answer within the read timeout.
    #[error("Read timed out on {0}")]
    Timeout(String),

    /// Any other failure on the serial link.
    #[error("Serial error: {0}")]
    Serial(String),

    /// The instrument answered with something that is not a number.
    #[error("Malformed reading '{0}'")]
    MalformedReading(String),

    /// A voltage outside the range the thermocouple model was fitted over.
    #[error("Millivolt reading {0} outside of modelled range")]
    OutOfRange(f64),

    /// File I/O on the log target.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or writing on the log target.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Compiled without the feature needed for this operation.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl LoggerError {
    /// True for the error kind that marks an empty device buffer during a drain.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoggerError::Timeout(_))
    }
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::Error> for LoggerError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => {
                LoggerError::Timeout(err.description)
            }
            _ => LoggerError::Serial(err.description),
        }
    }
}
