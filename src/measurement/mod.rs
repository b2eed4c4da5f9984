//! Measurement values produced by one polling pass.

use chrono::NaiveDateTime;
use std::fmt;

pub mod thermocouple;

/// Marker written in place of a reading that could not be taken or converted.
pub const ERROR_SENTINEL: &str = "#ERROR";

/// One column of a measurement row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reading {
    /// Slot is unconfigured.
    Empty,
    /// Decimal string as read (or converted) from the instrument.
    Value(String),
    /// Communication or conversion failure for this slot.
    Error,
}

impl Reading {
    /// True for the error sentinel.
    pub fn is_error(&self) -> bool {
        matches!(self, Reading::Error)
    }

    /// Text written to the CSV column.
    pub fn as_str(&self) -> &str {
        match self {
            Reading::Empty => "",
            Reading::Value(value) => value,
            Reading::Error => ERROR_SENTINEL,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp plus one reading per slot, in slot order.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRow {
    /// Local wall-clock time the pass started.
    pub timestamp: NaiveDateTime,
    /// Readings for slots 1, 2 and 3.
    pub readings: [Reading; 3],
}

impl MeasurementRow {
    /// Build a row from a timestamp and three readings.
    pub fn new(timestamp: NaiveDateTime, readings: [Reading; 3]) -> Self {
        Self {
            timestamp,
            readings,
        }
    }

    /// True if any column holds the error sentinel.
    pub fn has_error(&self) -> bool {
        self.readings.iter().any(Reading::is_error)
    }

    /// Timestamp trimmed to whole seconds, for operator-facing messages.
    pub fn simple_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 6)
            .and_then(|d| d.and_hms_micro_opt(9, 15, 30, 250_000))
            .unwrap()
    }

    #[test]
    fn test_reading_text() {
        assert_eq!(Reading::Empty.as_str(), "");
        assert_eq!(Reading::Value("1.23".into()).to_string(), "1.23");
        assert_eq!(Reading::Error.to_string(), "#ERROR");
    }

    #[test]
    fn test_row_error_detection() {
        let ok = MeasurementRow::new(
            timestamp(),
            [Reading::Value("1".into()), Reading::Empty, Reading::Empty],
        );
        assert!(!ok.has_error());

        let bad = MeasurementRow::new(
            timestamp(),
            [Reading::Value("1".into()), Reading::Error, Reading::Empty],
        );
        assert!(bad.has_error());
        assert_eq!(bad.simple_timestamp(), "2024-03-06 09:15:30");
    }
}
