//! Command sequences for an Agilent 3458A multimeter behind the bridge.
//!
//! Bridge commands (`++...`) are consumed by the controller itself; everything
//! else is forwarded to the instrument at the currently selected address.

use crate::adapters::BridgeConnection;
use crate::error::{AppResult, LoggerError};
use log::debug;
use std::thread;
use std::time::Duration;

/// Identification probe answered by the bridge controller.
pub const HELP: &str = "++help";
/// Let the bridge read back after every write.
pub const AUTO_READ: &str = "++auto 1";
/// Reset the instrument to its default settings.
pub const PRESET: &str = "PRESET NORM";
/// Silence the beeper.
pub const BEEP_OFF: &str = "BEEP 0";
/// Clear memory buffers.
pub const CLEAR: &str = "CLEAR";
/// Stop autonomous triggering.
pub const TRIGGER_HOLD: &str = "TRIG HOLD";
/// Take one reading and return it.
pub const TRIGGER_SINGLE: &str = "TRIG SGL";

/// Bridge command selecting the instrument at `address`.
pub fn address_command(address: i32) -> String {
    format!("++addr {address}")
}

/// Put the instrument at `address` into a known, held state.
///
/// After `TRIG HOLD` the instrument only samples when triggered, so readings are
/// never stale. Samples taken before the hold arrived are drained; a read timeout
/// during the drain means the buffer is empty.
pub fn initialize(
    conn: &mut dyn BridgeConnection,
    address: i32,
    settle: Duration,
) -> AppResult<()> {
    if address <= 0 {
        return Err(LoggerError::InvalidAddress(address));
    }
    debug!("Initializing instrument at address {address}");

    conn.write(&address_command(address))?;
    conn.write(AUTO_READ)?;

    thread::sleep(settle);

    for command in [PRESET, BEEP_OFF, CLEAR, TRIGGER_HOLD] {
        conn.write(command)?;
    }

    while conn.bytes_in_buffer()? > 0 {
        match conn.read() {
            Ok(stale) => debug!("Discarded stale sample {:?} from {address}", stale),
            Err(e) if e.is_timeout() => {
                debug!("Instrument {address} data buffer emptied");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    debug!("Instrument initialized at address {address}");
    Ok(())
}

/// Trigger one reading from the instrument at `address` and clean it up.
pub fn read_single(conn: &mut dyn BridgeConnection, address: i32) -> AppResult<String> {
    conn.write(&address_command(address))?;
    debug!("Triggering instrument {address}");
    let raw = conn.query(TRIGGER_SINGLE)?;
    debug!("Address {address} value {raw:?}");
    Ok(clean_reading(&raw))
}

/// Strip whitespace, line endings and stray NUL bytes from a raw reading.
///
/// Readings look like `" 9.089320482E+00\r\n"`, occasionally with leading NULs.
pub fn clean_reading(raw: &str) -> String {
    raw.replace('\0', "").trim().to_string()
}
