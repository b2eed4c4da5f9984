//! Configuration loading using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `GPIB_LOGGER_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! GPIB_LOGGER_SERIAL__TIMEOUT_MS=5000
//! GPIB_LOGGER_LOGGING__INTERVAL_SECS=2.5
//! GPIB_LOGGER_LOGGING__LOG_LEVEL=debug
//! ```
//!
//! # Example file
//!
//! ```toml
//! [serial]
//! baud_rate = 115200
//! timeout_ms = 3000
//!
//! [logging]
//! interval_secs = 1.0
//! output_path = "readings.csv"
//!
//! [[instruments]]
//! slot = 1
//! address = 22
//! convert_to_temperature = true
//! ```

use crate::error::{AppResult, LoggerError};
use crate::instrument::SLOT_COUNT;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "GPIB_LOGGER_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Serial link to the bridge controller
    #[serde(default)]
    pub serial: SerialSettings,
    /// Polling and output settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Instruments to configure at startup
    #[serde(default)]
    pub instruments: Vec<InstrumentSettings>,
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate; the USB bridge ignores it but the OS driver wants one
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout per response line
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause after addressing a device before sending instrument commands
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Appended to every command written
    #[serde(default = "default_write_terminator")]
    pub write_terminator: String,
}

/// Polling and output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Seconds between polling passes
    #[serde(default)]
    pub interval_secs: Option<f64>,
    /// CSV file to log into
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Default log filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One instrument slot assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Slot 1, 2 or 3
    pub slot: usize,
    /// GPIB address; zero or negative leaves the slot unconfigured
    pub address: i32,
    /// Convert the voltage reading to a thermocouple temperature
    #[serde(default)]
    pub convert_to_temperature: bool,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_settle_ms() -> u64 {
    100
}

fn default_write_terminator() -> String {
    "\n".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
            write_terminator: default_write_terminator(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            interval_secs: None,
            output_path: None,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::figment(path).extract::<Settings>()?.validated()
    }

    /// The layered provider chain used by [`Settings::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(LoggerError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if self.serial.timeout_ms == 0 {
            return Err(LoggerError::Configuration(
                "serial.timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(interval) = self.logging.interval_secs {
            if !interval.is_finite() {
                return Err(LoggerError::Configuration(format!(
                    "logging.interval_secs must be a finite number, got {interval}"
                )));
            }
        }

        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if !(1..=SLOT_COUNT).contains(&instrument.slot) {
                return Err(LoggerError::InvalidSlot(instrument.slot));
            }
            if !seen.insert(instrument.slot) {
                return Err(LoggerError::Configuration(format!(
                    "instrument slot {} configured more than once",
                    instrument.slot
                )));
            }
        }
        Ok(())
    }

    fn validated(self) -> AppResult<Self> {
        self.validate()?;
        Ok(self)
    }
}
