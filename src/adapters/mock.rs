//! Scripted bridge and resource manager for tests.
//!
//! `MockBridge` emulates just enough of the bridge protocol: it tracks the address
//! selected with `++addr`, answers `++help` and `TRIG SGL` from a script, and keeps
//! a log of every command written. Clones share state, so a test can keep one
//! handle while the worker owns another.

use super::{BridgeConnection, ResourceManager};
use crate::error::{AppResult, LoggerError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockBridgeState {
    written: Vec<String>,
    address: Option<i32>,
    last_command: Option<String>,
    help_response: Option<String>,
    responses: HashMap<i32, String>,
    timeouts: HashSet<i32>,
    pending: VecDeque<String>,
    fail_writes: bool,
}

/// In-memory stand-in for a bridge connection.
#[derive(Clone)]
pub struct MockBridge {
    name: String,
    state: Arc<Mutex<MockBridgeState>>,
}

impl MockBridge {
    /// A bridge that answers nothing until scripted.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockBridgeState::default())),
        }
    }

    /// A bridge that identifies itself when probed with `++help`.
    pub fn controller(name: &str) -> Self {
        let bridge = Self::new(name);
        bridge.set_help_response("Prologix GPIB-USB Controller\r\n");
        bridge
    }

    fn lock(&self) -> MutexGuard<'_, MockBridgeState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Response to the identification probe.
    pub fn set_help_response(&self, response: &str) {
        self.lock().help_response = Some(response.to_string());
    }

    /// Response the instrument at `address` gives to every trigger.
    pub fn respond(&self, address: i32, response: &str) {
        let mut state = self.lock();
        state.timeouts.remove(&address);
        state.responses.insert(address, response.to_string());
    }

    /// Make every read from `address` time out.
    pub fn time_out(&self, address: i32) {
        self.lock().timeouts.insert(address);
    }

    /// Queue a stale sample that sits in the input buffer until read.
    pub fn queue_pending(&self, line: &str) {
        self.lock().pending.push_back(line.to_string());
    }

    /// Make every write fail.
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    /// Every command written so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Forget the command log.
    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    /// Stale samples not yet drained.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

impl BridgeConnection for MockBridge {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(LoggerError::Serial(format!("write to {} failed", self.name)));
        }
        if let Some(address) = command.strip_prefix("++addr ") {
            state.address = address.trim().parse().ok();
        }
        state.written.push(command.to_string());
        state.last_command = Some(command.to_string());
        Ok(())
    }

    fn read(&mut self) -> AppResult<String> {
        let mut state = self.lock();
        if let Some(line) = state.pending.pop_front() {
            return Ok(line);
        }

        let timeout = || LoggerError::Timeout(self.name.clone());
        match state.last_command.as_deref() {
            Some("++help") => state.help_response.clone().ok_or_else(timeout),
            Some("TRIG SGL") => {
                let address = state.address.ok_or_else(timeout)?;
                if state.timeouts.contains(&address) {
                    return Err(timeout());
                }
                state.responses.get(&address).cloned().ok_or_else(timeout)
            }
            _ => Err(timeout()),
        }
    }

    fn bytes_in_buffer(&mut self) -> AppResult<usize> {
        Ok(self.lock().pending.iter().map(String::len).sum())
    }
}

/// Resource manager over a fixed list of mock resources.
#[derive(Clone, Default)]
pub struct MockResourceManager {
    resources: Vec<(String, Option<MockBridge>)>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockResourceManager {
    /// No resources at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a resource backed by `bridge`.
    pub fn with_bridge(mut self, bridge: MockBridge) -> Self {
        self.resources.push((bridge.name.clone(), Some(bridge)));
        self
    }

    /// Add a resource that fails to open.
    pub fn with_unopenable(mut self, name: &str) -> Self {
        self.resources.push((name.to_string(), None));
        self
    }

    /// Resources opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ResourceManager for MockResourceManager {
    fn list_resources(&self) -> AppResult<Vec<String>> {
        Ok(self.resources.iter().map(|(name, _)| name.clone()).collect())
    }

    fn open(&self, resource: &str) -> AppResult<Box<dyn BridgeConnection>> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(resource.to_string());

        match self.resources.iter().find(|(name, _)| name == resource) {
            Some((_, Some(bridge))) => Ok(Box::new(bridge.clone())),
            _ => Err(LoggerError::Serial(format!("cannot open {resource}"))),
        }
    }
}
