//! Locating the bridge controller among the host's serial resources.

use crate::adapters::{BridgeConnection, ResourceManager};
use crate::error::{AppResult, LoggerError};
use crate::instrument::multimeter::HELP;
use log::{debug, error, info};

/// True if `conn` answers the identification probe with something.
///
/// Timeouts and I/O failures mean "not the controller", never an error.
pub fn is_bridge_controller(conn: &mut dyn BridgeConnection) -> bool {
    match conn.query(HELP) {
        Ok(response) => !response.trim().is_empty(),
        Err(e) => {
            debug!(
                "No response to {HELP} for resource {}: {e}",
                conn.resource_name()
            );
            false
        }
    }
}

/// Probe every resource, most recently enumerated first, and return the first
/// one that identifies as the bridge controller.
pub fn discover_controller(rm: &dyn ResourceManager) -> AppResult<Box<dyn BridgeConnection>> {
    let resources = rm.list_resources()?;
    info!("Resources available: {resources:?}");

    // The controller is usually the last port enumerated
    for resource in resources.iter().rev() {
        let mut conn = match rm.open(resource) {
            Ok(conn) => conn,
            Err(e) => {
                debug!("Could not open resource {resource}: {e}");
                continue;
            }
        };

        if is_bridge_controller(conn.as_mut()) {
            info!("Found Prologix controller at {resource}");
            return Ok(conn);
        }
    }

    error!("No Prologix controller found");
    Err(LoggerError::ControllerNotFound)
}
