//! Instrument slots, device command sequences and bridge discovery.
//!
//! Up to three multimeters hang off the one bridge controller. Each occupies a
//! fixed slot; slot order is both the query order within a pass and the column
//! order in the log file.

pub mod discovery;
pub mod multimeter;

use crate::error::{AppResult, LoggerError};

/// Number of instrument slots; never changes at runtime.
pub const SLOT_COUNT: usize = 3;

/// Configuration of one instrument slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// GPIB address; zero or negative means unconfigured
    pub address: i32,
    /// Convert the voltage reading to a thermocouple temperature
    pub convert_to_temperature: bool,
}

impl InstrumentConfig {
    /// A configured slot.
    pub fn new(address: i32, convert_to_temperature: bool) -> Self {
        Self {
            address,
            convert_to_temperature,
        }
    }

    /// An empty slot.
    pub fn unconfigured() -> Self {
        Self::new(-1, false)
    }

    /// True if this slot should be queried.
    pub fn is_configured(&self) -> bool {
        self.address > 0
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::unconfigured()
    }
}

/// The three instrument slots, in query order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrumentRegistry {
    slots: [InstrumentConfig; SLOT_COUNT],
}

impl InstrumentRegistry {
    /// All slots unconfigured.
    pub fn new() -> Self {
        Self::default()
    }

    fn index(slot: usize) -> AppResult<usize> {
        if (1..=SLOT_COUNT).contains(&slot) {
            Ok(slot - 1)
        } else {
            Err(LoggerError::InvalidSlot(slot))
        }
    }

    /// Configuration of `slot` (1-based).
    pub fn get(&self, slot: usize) -> AppResult<InstrumentConfig> {
        Ok(self.slots[Self::index(slot)?])
    }

    /// Replace the configuration of `slot`, returning the previous one.
    ///
    /// An invalid slot fails without touching any slot.
    pub fn set(&mut self, slot: usize, config: InstrumentConfig) -> AppResult<InstrumentConfig> {
        let index = Self::index(slot)?;
        Ok(std::mem::replace(&mut self.slots[index], config))
    }

    /// `(slot, config)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &InstrumentConfig)> {
        self.slots.iter().enumerate().map(|(i, c)| (i + 1, c))
    }

    /// True if at least one slot has a positive address.
    pub fn any_configured(&self) -> bool {
        self.slots.iter().any(InstrumentConfig::is_configured)
    }
}
