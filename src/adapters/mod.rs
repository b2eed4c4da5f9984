//! Bridge connection adapters
//!
//! This module defines the two seams between the polling worker and the host:
//! [`BridgeConnection`], a line-oriented link to the serial-to-GPIB bridge, and
//! [`ResourceManager`], which enumerates and opens candidate resources during
//! discovery. The real implementations live in [`serial_adapter`]; [`mock`]
//! provides scripted doubles for tests.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockBridge, MockResourceManager};
pub use serial_adapter::{SerialBridge, SerialResourceManager};

use crate::error::AppResult;

/// Line-oriented link to the bridge controller.
///
/// Implementations append the write terminator themselves and strip nothing from
/// what they read; cleaning a reading is the caller's job.
pub trait BridgeConnection: Send {
    /// Name of the resource this connection was opened on.
    fn resource_name(&self) -> &str;

    /// Send one command line.
    fn write(&mut self, command: &str) -> AppResult<()>;

    /// Read one response line. Fails with `LoggerError::Timeout` when nothing
    /// arrives within the read timeout.
    fn read(&mut self) -> AppResult<String>;

    /// Number of bytes waiting in the input buffer.
    fn bytes_in_buffer(&mut self) -> AppResult<usize>;

    /// Send a command and read the response line.
    fn query(&mut self, command: &str) -> AppResult<String> {
        self.write(command)?;
        self.read()
    }
}

/// Enumerates and opens the resources discovery may probe.
pub trait ResourceManager: Send {
    /// Resource names in enumeration order.
    fn list_resources(&self) -> AppResult<Vec<String>>;

    /// Open a connection to one resource.
    fn open(&self, resource: &str) -> AppResult<Box<dyn BridgeConnection>>;
}
