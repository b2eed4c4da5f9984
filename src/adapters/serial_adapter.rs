//! Serial port adapter for the Prologix-style GPIB bridge.
//!
//! Wraps the `serialport` crate. Port reads use a short internal timeout and are
//! retried until the configured read timeout elapses, so a slow instrument and a
//! missing one are told apart only by the overall deadline.

use crate::config::SerialSettings;

// ============================================================================
// Serial support enabled
// ============================================================================

#[cfg(feature = "instrument_serial")]
mod serial_enabled {
    use super::*;
    use crate::adapters::{BridgeConnection, ResourceManager};
    use crate::error::{AppResult, LoggerError};
    use log::debug;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    /// Internal port timeout; the overall deadline is `SerialSettings::timeout_ms`.
    const POLL_TIMEOUT: Duration = Duration::from_millis(100);

    /// An open serial link to the bridge.
    pub struct SerialBridge {
        port_name: String,
        port: Box<dyn SerialPort>,
        timeout: Duration,
        write_terminator: String,
    }

    impl SerialBridge {
        /// Open `port_name` with the given settings.
        pub fn open(port_name: &str, settings: &SerialSettings) -> AppResult<Self> {
            let port = serialport::new(port_name, settings.baud_rate)
                .timeout(POLL_TIMEOUT)
                .open()?;

            debug!(
                "Serial port '{}' opened at {} baud",
                port_name, settings.baud_rate
            );

            Ok(Self {
                port_name: port_name.to_string(),
                port,
                timeout: Duration::from_millis(settings.timeout_ms),
                write_terminator: settings.write_terminator.clone(),
            })
        }
    }

    impl BridgeConnection for SerialBridge {
        fn resource_name(&self) -> &str {
            &self.port_name
        }

        fn write(&mut self, command: &str) -> AppResult<()> {
            let line = format!("{}{}", command, self.write_terminator);
            self.port.write_all(line.as_bytes())?;
            self.port.flush()?;
            debug!("[{}] Sent command: {}", self.port_name, command);
            Ok(())
        }

        fn read(&mut self) -> AppResult<String> {
            let mut response: Vec<u8> = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > self.timeout {
                    return Err(LoggerError::Timeout(self.port_name.clone()));
                }

                match self.port.read(&mut buffer) {
                    Ok(1) => {
                        response.push(buffer[0]);
                        if buffer[0] == b'\n' {
                            break;
                        }
                    }
                    Ok(_) => {
                        return Err(LoggerError::Serial(format!(
                            "Unexpected EOF from {}",
                            self.port_name
                        )));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let response = String::from_utf8_lossy(&response).into_owned();
            debug!("[{}] Received response: {:?}", self.port_name, response);
            Ok(response)
        }

        fn bytes_in_buffer(&mut self) -> AppResult<usize> {
            Ok(self.port.bytes_to_read()? as usize)
        }
    }

    /// Enumerates the host's serial ports.
    pub struct SerialResourceManager {
        settings: SerialSettings,
    }

    impl SerialResourceManager {
        /// Create a manager that opens ports with `settings`.
        pub fn new(settings: SerialSettings) -> Self {
            Self { settings }
        }
    }

    impl ResourceManager for SerialResourceManager {
        fn list_resources(&self) -> AppResult<Vec<String>> {
            let ports = serialport::available_ports()?;
            Ok(ports.into_iter().map(|p| p.port_name).collect())
        }

        fn open(&self, resource: &str) -> AppResult<Box<dyn BridgeConnection>> {
            Ok(Box::new(SerialBridge::open(resource, &self.settings)?))
        }
    }
}

// ============================================================================
// Serial support disabled
// ============================================================================

#[cfg(not(feature = "instrument_serial"))]
mod serial_disabled {
    use super::*;
    use crate::adapters::{BridgeConnection, ResourceManager};
    use crate::error::{AppResult, LoggerError};

    fn disabled() -> LoggerError {
        LoggerError::FeatureNotEnabled("instrument_serial".to_string())
    }

    /// Placeholder; serial support was compiled out.
    pub struct SerialBridge;

    impl SerialBridge {
        /// Always fails without the `instrument_serial` feature.
        pub fn open(_port_name: &str, _settings: &SerialSettings) -> AppResult<Self> {
            Err(disabled())
        }
    }

    impl BridgeConnection for SerialBridge {
        fn resource_name(&self) -> &str {
            ""
        }

        fn write(&mut self, _command: &str) -> AppResult<()> {
            Err(disabled())
        }

        fn read(&mut self) -> AppResult<String> {
            Err(disabled())
        }

        fn bytes_in_buffer(&mut self) -> AppResult<usize> {
            Err(disabled())
        }
    }

    /// Placeholder; serial support was compiled out.
    pub struct SerialResourceManager;

    impl SerialResourceManager {
        /// Create a manager whose every operation fails.
        pub fn new(_settings: SerialSettings) -> Self {
            Self
        }
    }

    impl ResourceManager for SerialResourceManager {
        fn list_resources(&self) -> AppResult<Vec<String>> {
            Err(disabled())
        }

        fn open(&self, _resource: &str) -> AppResult<Box<dyn BridgeConnection>> {
            Err(disabled())
        }
    }
}

#[cfg(feature = "instrument_serial")]
pub use serial_enabled::{SerialBridge, SerialResourceManager};

#[cfg(not(feature = "instrument_serial"))]
pub use serial_disabled::{SerialBridge, SerialResourceManager};
