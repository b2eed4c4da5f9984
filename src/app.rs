//! Logging controller
//!
//! The control surface the UI (or the CLI) talks to. It owns the run gate and the
//! event bus, forwards configuration into the worker, and runs the worker loop on
//! its own thread. Configuration calls block while a pass is in flight, since
//! they share the worker's lock with the device queries.

use crate::{
    adapters::ResourceManager,
    config::Settings,
    error::AppResult,
    instrument::InstrumentConfig,
    messages::{EventBus, LoggerEvent},
    worker::{RunGate, Worker},
};
use log::{error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;

/// Name of the polling thread, as shown by debuggers and panics.
pub const WORKER_THREAD_NAME: &str = "polling-worker";

/// Configure, start and stop the polling worker.
pub struct LoggingController {
    worker: Arc<Worker>,
    gate: Arc<RunGate>,
    events: EventBus,
    handle: Mutex<Option<JoinHandle<AppResult<()>>>>,
}

impl LoggingController {
    /// A controller whose worker is not running yet.
    pub fn new(settings: &Settings) -> Self {
        let gate = Arc::new(RunGate::new());
        let events = EventBus::new();
        let worker = Arc::new(Worker::new(&settings.serial, gate.clone(), events.clone()));

        Self {
            worker,
            gate,
            events,
            handle: Mutex::new(None),
        }
    }

    /// The worker this controller drives.
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Receive worker and controller notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LoggerEvent> {
        self.events.subscribe()
    }

    /// Spawn the polling thread. It discovers the bridge, then idles until
    /// [`LoggingController::start`].
    pub fn start_worker<R>(&self, rm: R) -> AppResult<()>
    where
        R: ResourceManager + 'static,
    {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            warn!("Polling worker already started");
            return Ok(());
        }

        info!("Starting worker thread");
        let worker = self.worker.clone();
        *handle = Some(
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || worker.run(&rm))?,
        );
        Ok(())
    }

    /// Configure one instrument slot.
    pub fn configure(
        &self,
        slot: usize,
        address: i32,
        convert_to_temperature: bool,
    ) -> AppResult<()> {
        self.worker.configure(slot, address, convert_to_temperature)
    }

    /// Configuration of one slot.
    pub fn instrument(&self, slot: usize) -> AppResult<InstrumentConfig> {
        self.worker.instrument(slot)
    }

    /// Set the update interval from operator text.
    pub fn set_interval(&self, text: &str) -> AppResult<()> {
        self.worker.set_interval(text)
    }

    /// Select the CSV file to log into.
    pub fn set_output_path(&self, path: impl AsRef<Path>) -> AppResult<()> {
        self.worker.set_output_path(path)
    }

    /// Apply the output path, interval and instruments from `settings`.
    pub fn apply_settings(&self, settings: &Settings) -> AppResult<()> {
        if let Some(path) = &settings.logging.output_path {
            self.set_output_path(path)?;
        }
        if let Some(interval) = settings.logging.interval_secs {
            self.worker.set_interval_secs(interval)?;
        }
        for instrument in &settings.instruments {
            self.configure(
                instrument.slot,
                instrument.address,
                instrument.convert_to_temperature,
            )?;
        }
        Ok(())
    }

    /// True when logging could start.
    pub fn validate_readiness(&self) -> bool {
        self.worker.validate_readiness()
    }

    /// Start logging if the parameters are valid. Returns whether it started.
    pub fn start(&self) -> bool {
        if !self.worker.validate_readiness() {
            return false;
        }
        self.gate.set();
        self.events.publish(LoggerEvent::LoggingStarted);
        info!("Logging started");
        true
    }

    /// Stop logging. Safe to call when not logging.
    pub fn stop(&self) {
        self.gate.clear();
        self.events.publish(LoggerEvent::LoggingStopped);
        info!("Logging stopped");
    }

    /// True while the run gate is set.
    pub fn is_logging(&self) -> bool {
        self.gate.is_set()
    }

    /// Stop the worker loop, close the log file and join the polling thread.
    ///
    /// A pass already in flight runs to completion first.
    pub fn shutdown(&self) -> AppResult<()> {
        self.worker.shutdown()?;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(Ok(())) => info!("Polling worker joined"),
                Ok(Err(e)) => warn!("Polling worker ended with error: {e}"),
                Err(_) => error!("Polling worker panicked"),
            }
        }
        Ok(())
    }
}

impl Drop for LoggingController {
    fn drop(&mut self) {
        // Never leave the polling thread parked on the gate
        self.gate.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockBridge, MockResourceManager};

    #[test]
    fn test_start_with_invalid_params() {
        let controller = LoggingController::new(&Settings::default());
        let mut rx = controller.subscribe();

        assert!(!controller.start());
        assert!(!controller.is_logging());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_without_start() {
        let controller = LoggingController::new(&Settings::default());
        let mut rx = controller.subscribe();

        controller.stop();
        controller.stop();

        assert!(!controller.is_logging());
        assert_eq!(rx.try_recv().unwrap(), LoggerEvent::LoggingStopped);
    }

    #[test]
    fn test_start_with_valid_params() {
        let dir = tempfile::tempdir().unwrap();
        let controller = LoggingController::new(&Settings::default());
        let mut rx = controller.subscribe();

        controller.configure(1, 23, false).unwrap();
        controller.set_interval("1").unwrap();
        controller.set_output_path(dir.path().join("log.csv")).unwrap();

        assert!(controller.validate_readiness());
        assert!(controller.start());
        assert!(controller.is_logging());
        assert_eq!(rx.try_recv().unwrap(), LoggerEvent::LoggingStarted);

        controller.stop();
        assert!(!controller.is_logging());
    }

    #[test]
    fn test_discovery_failure_ends_worker() {
        let controller = LoggingController::new(&Settings::default());
        let mut rx = controller.subscribe();

        controller.start_worker(MockResourceManager::empty()).unwrap();
        controller.shutdown().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            LoggerEvent::Error("No Prologix controller found".into())
        );
        assert!(!controller.worker().is_connected());
    }

    #[test]
    fn test_worker_reports_init_complete() {
        let controller = LoggingController::new(&Settings::default());
        let mut rx = controller.subscribe();
        let rm = MockResourceManager::empty().with_bridge(MockBridge::controller("COM1"));

        controller.start_worker(rm).unwrap();
        assert_eq!(rx.blocking_recv().unwrap(), LoggerEvent::InitComplete);
        assert!(controller.worker().is_connected());

        controller.shutdown().unwrap();
    }
}
