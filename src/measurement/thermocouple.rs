//! Type K thermocouple voltage to temperature conversion.
//!
//! The conversion uses a cubic fitted against the Type K reference table between
//! -10 °C and 59 °C:
//!
//! ```text
//! T = a + b·mV + c·mV² + d·mV³
//! ```
//!
//! Readings arrive from the multimeter in volts and are scaled to millivolts
//! before the polynomial is applied.

use crate::error::{AppResult, LoggerError};

/// Polynomial coefficients, constant term first.
const A: f64 = -0.000725393446104;
const B: f64 = 25.346167279763222;
const C: f64 = -0.391455002477827;
const D: f64 = 0.039232630522331;

/// Open millivolt range the polynomial is valid for.
pub const MIN_MILLIVOLTS: f64 = -0.778;
/// Upper bound of the open millivolt range.
pub const MAX_MILLIVOLTS: f64 = 2.436;

/// Convert a thermocouple voltage in volts to degrees Celsius.
///
/// Fails with [`LoggerError::OutOfRange`] when the voltage falls outside the
/// modelled range.
pub fn volts_to_celsius(volts: f64) -> AppResult<f64> {
    let millivolts = volts * 1000.0;

    // NaN fails both comparisons and is rejected here too
    if !(millivolts > MIN_MILLIVOLTS && millivolts < MAX_MILLIVOLTS) {
        return Err(LoggerError::OutOfRange(millivolts));
    }

    Ok(A + B * millivolts + C * millivolts.powi(2) + D * millivolts.powi(3))
}

/// Parse a cleaned instrument reading and convert it to a temperature string.
pub fn reading_to_celsius(reading: &str) -> AppResult<String> {
    let volts: f64 = reading
        .parse()
        .map_err(|_| LoggerError::MalformedReading(reading.to_string()))?;
    volts_to_celsius(volts).map(|celsius| celsius.to_string())
}
