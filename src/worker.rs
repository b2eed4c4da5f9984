//! Polling worker
//!
//! The worker owns the bridge connection, the log writer and the instrument
//! registry behind a single mutex, so a configuration change can never interleave
//! with a device query or a row write. Public methods take the lock once and hand
//! the guarded state to private helpers; nothing re-enters the lock.
//!
//! # Loop
//!
//! ```text
//! discover bridge -> InitComplete
//! loop:
//!     wait on run gate          (idle, no CPU)
//!     one pass over slots 1..3  (errors contained per slot)
//!     write row, notify
//!     sleep interval            (sleep-after-work, drifts by the pass duration)
//! ```
//!
//! Clearing the run gate mid-sleep takes effect on the next wake. Only shutdown
//! cuts a sleep short.
//! An interval changed to zero or less while running pauses logging after the
//! current pass instead of polling back to back.

use crate::{
    adapters::{BridgeConnection, ResourceManager},
    config::SerialSettings,
    data::CsvLogWriter,
    error::{AppResult, LoggerError},
    instrument::{discovery, multimeter, InstrumentConfig, InstrumentRegistry},
    measurement::{thermocouple, MeasurementRow, Reading},
    messages::{EventBus, LoggerEvent},
};
use anyhow::Context;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// =============================================================================
// Run gate
// =============================================================================

#[derive(Default)]
struct GateState {
    run: bool,
    shutdown: bool,
}

/// Run flag with blocking wait, shared by the controller and the worker.
#[derive(Default)]
pub struct RunGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl RunGate {
    /// A cleared gate.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allow passes to run.
    pub fn set(&self) {
        self.lock().run = true;
        self.changed.notify_all();
    }

    /// Hold the worker idle after its current iteration.
    pub fn clear(&self) {
        self.lock().run = false;
        self.changed.notify_all();
    }

    /// True while passes are allowed.
    pub fn is_set(&self) -> bool {
        self.lock().run
    }

    /// Release every waiter for good.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.changed.notify_all();
    }

    /// True once [`RunGate::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Block until the gate is set. Returns `false` if woken by shutdown instead.
    pub fn wait(&self) -> bool {
        let state = self
            .changed
            .wait_while(self.lock(), |s| !s.run && !s.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        !state.shutdown
    }

    /// Sleep for `duration` unless shut down first. Returns `false` on shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (state, _) = self
            .changed
            .wait_timeout_while(self.lock(), duration, |s| !s.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        !state.shutdown
    }
}

// =============================================================================
// Worker
// =============================================================================

struct WorkerState {
    connection: Option<Box<dyn BridgeConnection>>,
    writer: Option<CsvLogWriter>,
    registry: InstrumentRegistry,
    interval_secs: f64,
}

/// Owns the bridge connection and runs the polling loop.
pub struct Worker {
    state: Mutex<WorkerState>,
    gate: Arc<RunGate>,
    events: EventBus,
    settle: Duration,
}

impl Worker {
    /// A worker with no connection, no writer and every slot unconfigured.
    pub fn new(serial: &SerialSettings, gate: Arc<RunGate>, events: EventBus) -> Self {
        Self {
            state: Mutex::new(WorkerState {
                connection: None,
                writer: None,
                registry: InstrumentRegistry::new(),
                interval_secs: 0.0,
            }),
            gate,
            events,
            settle: Duration::from_millis(serial.settle_ms),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch logging to a new CSV file, closing the current one first.
    pub fn set_output_path(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        info!("Setting filepath to {}", path.display());

        let mut state = self.lock();
        if let Some(old) = state.writer.take() {
            old.close()?;
        }
        state.writer = Some(CsvLogWriter::create(path)?);
        Ok(())
    }

    /// Current log file, if any.
    pub fn output_path(&self) -> Option<std::path::PathBuf> {
        self.lock().writer.as_ref().map(|w| w.path().to_path_buf())
    }

    /// Set the interval from operator text. Empty text (a cleared field) is ignored.
    pub fn set_interval(&self, text: &str) -> AppResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let seconds: f64 = text
            .parse()
            .map_err(|_| LoggerError::InvalidInterval(text.to_string()))?;
        self.set_interval_secs(seconds)
    }

    /// Set the interval in seconds.
    ///
    /// Zero or negative is accepted but keeps logging from starting. Positive
    /// values must fit in a [`Duration`].
    pub fn set_interval_secs(&self, seconds: f64) -> AppResult<()> {
        let representable = seconds <= 0.0 || Duration::try_from_secs_f64(seconds).is_ok();
        if !seconds.is_finite() || !representable {
            return Err(LoggerError::InvalidInterval(seconds.to_string()));
        }
        debug!("Update interval set to {seconds} s");
        self.lock().interval_secs = seconds;
        Ok(())
    }

    /// Seconds between passes.
    pub fn interval_secs(&self) -> f64 {
        self.lock().interval_secs
    }

    /// Configure one slot and initialize its instrument.
    ///
    /// If the instrument cannot be initialized the previous configuration is
    /// restored and the error returned. Before the bridge is connected the
    /// configuration is only stored; initialization then happens at discovery.
    pub fn configure(
        &self,
        slot: usize,
        address: i32,
        convert_to_temperature: bool,
    ) -> AppResult<()> {
        info!(
            "Configuring instrument {slot}; address {address}, measure temp {convert_to_temperature}"
        );
        let config = InstrumentConfig::new(address, convert_to_temperature);

        let mut guard = self.lock();
        let state = &mut *guard;
        let previous = state.registry.set(slot, config)?;

        if !config.is_configured() {
            return Ok(());
        }
        let Some(conn) = state.connection.as_mut() else {
            debug!("Bridge not connected yet; instrument {slot} initializes at discovery");
            return Ok(());
        };

        if let Err(e) = multimeter::initialize(&mut **conn, address, self.settle) {
            state.registry.set(slot, previous)?;
            return Err(e);
        }
        Ok(())
    }

    /// Configuration of one slot.
    pub fn instrument(&self, slot: usize) -> AppResult<InstrumentConfig> {
        self.lock().registry.get(slot)
    }

    /// True when an address, a positive interval and a log file are all set.
    pub fn validate_readiness(&self) -> bool {
        let state = self.lock();

        if !state.registry.any_configured() {
            warn!("No GPIB addresses set for any instrument");
            return false;
        }
        if state.interval_secs <= 0.0 {
            warn!("No update interval set");
            return false;
        }
        if state.writer.is_none() {
            warn!("No logfile selected");
            return false;
        }

        info!("Parameters are valid");
        true
    }

    /// True once discovery has found the bridge controller.
    pub fn is_connected(&self) -> bool {
        self.lock().connection.is_some()
    }

    /// Find the bridge controller and initialize every slot configured so far.
    ///
    /// A slot that fails to initialize is logged and left configured; its
    /// readings will show up as errors.
    pub fn init_connection(&self, rm: &dyn ResourceManager) -> AppResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut conn = discovery::discover_controller(rm)?;
        for (slot, config) in state.registry.iter().filter(|(_, c)| c.is_configured()) {
            if let Err(e) = multimeter::initialize(conn.as_mut(), config.address, self.settle) {
                error!("Failed to initialize instrument {slot} at {}: {e}", config.address);
            }
        }

        state.connection = Some(conn);
        info!("Connection initialized");
        Ok(())
    }

    /// Read every slot once, in slot order.
    pub fn query_instruments(&self) -> AppResult<MeasurementRow> {
        let mut guard = self.lock();
        Self::query_locked(&mut guard)
    }

    fn query_locked(state: &mut WorkerState) -> AppResult<MeasurementRow> {
        let conn = state.connection.as_mut().ok_or(LoggerError::NotConnected)?;
        let timestamp = chrono::Local::now().naive_local();

        let mut readings = [Reading::Empty, Reading::Empty, Reading::Empty];
        for ((_, config), reading) in state.registry.iter().zip(readings.iter_mut()) {
            *reading = read_slot(&mut **conn, config);
        }

        Ok(MeasurementRow::new(timestamp, readings))
    }

    /// Run one pass: query, notify, and write the row.
    ///
    /// The row is written even if some columns hold the error sentinel.
    pub fn do_logging(&self) -> AppResult<MeasurementRow> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.writer.is_none() {
            return Err(LoggerError::Configuration("No logfile selected".to_string()));
        }
        let row = Self::query_locked(state)?;

        if row.has_error() {
            error!("Unable to read data");
            self.events.publish(LoggerEvent::Error(format!(
                "Unable to read data {}",
                row.simple_timestamp()
            )));
        } else {
            self.events.publish(LoggerEvent::QueryComplete(row.timestamp));
        }

        let [first, second, third] = &row.readings;
        info!("Data read: {} {first} {second} {third}", row.timestamp);

        if let Some(writer) = state.writer.as_mut() {
            writer.write(&row)?;
        }
        Ok(row)
    }

    /// Discover the bridge, then poll until shutdown.
    ///
    /// Discovery failure is published as an error event and ends the worker.
    pub fn run(&self, rm: &dyn ResourceManager) -> AppResult<()> {
        if let Err(e) = self.init_connection(rm) {
            self.events.publish(LoggerEvent::Error(e.to_string()));
            return Err(e);
        }
        self.events.publish(LoggerEvent::InitComplete);

        while self.gate.wait() {
            let pass = self
                .do_logging()
                .context("Unexpected error while logging data");
            if let Err(e) = pass {
                error!("{e:#}");
            }

            let interval = match Duration::try_from_secs_f64(self.interval_secs()) {
                Ok(interval) if !interval.is_zero() => interval,
                _ => {
                    warn!("Update interval no longer positive; logging paused");
                    self.gate.clear();
                    self.events.publish(LoggerEvent::LoggingStopped);
                    continue;
                }
            };
            if !self.gate.sleep(interval) {
                break;
            }
        }

        info!("Polling worker stopped");
        Ok(())
    }

    /// Deterministic teardown: stop the loop, clear the run flag, close the log.
    pub fn shutdown(&self) -> AppResult<()> {
        self.gate.clear();
        self.gate.shutdown();

        let writer = self.lock().writer.take();
        if let Some(writer) = writer {
            writer.close()?;
        }
        Ok(())
    }
}

/// Read one slot, turning every failure into the error sentinel.
fn read_slot(conn: &mut dyn BridgeConnection, config: &InstrumentConfig) -> Reading {
    if !config.is_configured() {
        return Reading::Empty;
    }

    let value = match multimeter::read_single(conn, config.address) {
        Ok(value) => value,
        Err(e) => {
            error!("Exception reading from address {}: {e}", config.address);
            return Reading::Error;
        }
    };

    if !config.convert_to_temperature {
        return Reading::Value(value);
    }
    match thermocouple::reading_to_celsius(&value) {
        Ok(celsius) => Reading::Value(celsius),
        Err(e) => {
            error!(
                "Exception converting value {value} to temperature from address {}: {e}",
                config.address
            );
            Reading::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockBridge, MockResourceManager};
    use std::thread;
    use std::time::Instant;

    fn connected_worker() -> (Worker, MockBridge, EventBus) {
        let events = EventBus::new();
        let worker = Worker::new(
            &SerialSettings {
                settle_ms: 0,
                ..SerialSettings::default()
            },
            Arc::new(RunGate::new()),
            events.clone(),
        );
        let bridge = MockBridge::controller("COM1");
        let rm = MockResourceManager::empty().with_bridge(bridge.clone());
        worker.init_connection(&rm).unwrap();
        bridge.clear_written();
        (worker, bridge, events)
    }

    #[test]
    fn test_gate_wait_returns_when_set() {
        let gate = Arc::new(RunGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.set();
        assert!(waiter.join().unwrap());
        assert!(gate.is_set());
    }

    #[test]
    fn test_gate_shutdown_cuts_sleep_short() {
        let gate = Arc::new(RunGate::new());
        let sleeper = {
            let gate = gate.clone();
            thread::spawn(move || gate.sleep(Duration::from_secs(30)))
        };
        let start = Instant::now();
        thread::sleep(Duration::from_millis(20));
        gate.shutdown();
        assert!(!sleeper.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!gate.wait());
    }

    #[test]
    fn test_gate_clear_does_not_cut_sleep_short() {
        let gate = RunGate::new();
        gate.set();
        gate.clear();
        let start = Instant::now();
        assert!(gate.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_configure_initializes_instrument() {
        let (worker, bridge, _) = connected_worker();

        worker.configure(1, 22, false).unwrap();

        assert_eq!(worker.instrument(1).unwrap(), InstrumentConfig::new(22, false));
        assert_eq!(
            bridge.written(),
            vec!["++addr 22", "++auto 1", "PRESET NORM", "BEEP 0", "CLEAR", "TRIG HOLD"]
        );
    }

    #[test]
    fn test_configure_override_replaces_config() {
        let (worker, _, _) = connected_worker();
        worker.configure(1, 22, false).unwrap();
        worker.configure(1, 44, true).unwrap();
        assert_eq!(worker.instrument(1).unwrap(), InstrumentConfig::new(44, true));
    }

    #[test]
    fn test_configure_invalid_slot() {
        let (worker, bridge, _) = connected_worker();
        for slot in [0, 4, 5] {
            assert!(matches!(
                worker.configure(slot, 123, false),
                Err(LoggerError::InvalidSlot(_))
            ));
        }
        for slot in 1..=3 {
            assert!(!worker.instrument(slot).unwrap().is_configured());
        }
        assert!(bridge.written().is_empty());
    }

    #[test]
    fn test_configure_rolls_back_on_init_failure() {
        let (worker, bridge, _) = connected_worker();
        worker.configure(2, 22, false).unwrap();

        bridge.fail_writes();
        assert!(worker.configure(2, 44, true).is_err());
        assert_eq!(worker.instrument(2).unwrap(), InstrumentConfig::new(22, false));
    }

    #[test]
    fn test_configure_before_connection_defers_init() {
        let worker = Worker::new(
            &SerialSettings {
                settle_ms: 0,
                ..SerialSettings::default()
            },
            Arc::new(RunGate::new()),
            EventBus::new(),
        );
        worker.configure(3, 9, false).unwrap();
        assert!(!worker.is_connected());

        let bridge = MockBridge::controller("COM7");
        let rm = MockResourceManager::empty().with_bridge(bridge.clone());
        worker.init_connection(&rm).unwrap();

        assert!(worker.is_connected());
        assert!(bridge.written().contains(&"++addr 9".to_string()));
        assert!(bridge.written().contains(&"TRIG HOLD".to_string()));
    }

    #[test]
    fn test_unconfigure_skips_device() {
        let (worker, bridge, _) = connected_worker();
        worker.configure(1, 0, false).unwrap();
        assert!(!worker.instrument(1).unwrap().is_configured());
        assert!(bridge.written().is_empty());
    }

    #[test]
    fn test_set_interval_text() {
        let (worker, _, _) = connected_worker();
        worker.set_interval("2.5").unwrap();
        assert_eq!(worker.interval_secs(), 2.5);

        worker.set_interval("").unwrap();
        assert_eq!(worker.interval_secs(), 2.5);

        assert!(matches!(
            worker.set_interval("fast"),
            Err(LoggerError::InvalidInterval(_))
        ));
        assert_eq!(worker.interval_secs(), 2.5);
    }

    #[test]
    fn test_set_interval_too_long_for_a_duration() {
        let (worker, _, _) = connected_worker();
        worker.set_interval("1").unwrap();

        assert!(matches!(
            worker.set_interval("1e20"),
            Err(LoggerError::InvalidInterval(_))
        ));
        assert!(matches!(
            worker.set_interval_secs(f64::MAX),
            Err(LoggerError::InvalidInterval(_))
        ));
        assert_eq!(worker.interval_secs(), 1.0);
    }

    #[test]
    fn test_validate_readiness_combinations() {
        let dir = tempfile::tempdir().unwrap();
        let cases: [(i32, &str, bool, bool); 5] = [
            (23, "1", true, true),
            (0, "1", true, false),
            (22, "0", true, false),
            (22, "-1", true, false),
            (22, "1", false, false),
        ];

        for (address, interval, with_writer, expected) in cases {
            let (worker, _, _) = connected_worker();
            worker.configure(1, address, false).unwrap();
            worker.set_interval(interval).unwrap();
            if with_writer {
                worker.set_output_path(dir.path().join("ready.csv")).unwrap();
            }
            assert_eq!(
                worker.validate_readiness(),
                expected,
                "address {address}, interval {interval}, writer {with_writer}"
            );
        }
    }

    #[test]
    fn test_set_output_path_repeatedly() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, _, _) = connected_worker();

        worker.set_output_path(dir.path().join("something.csv")).unwrap();
        worker
            .set_output_path(dir.path().join("somethingelse.csv"))
            .unwrap();
        assert_eq!(
            worker.output_path(),
            Some(dir.path().join("somethingelse.csv"))
        );
    }

    #[test]
    fn test_query_voltage() {
        let (worker, bridge, _) = connected_worker();
        worker.configure(1, 22, false).unwrap();
        bridge.respond(22, " 9.089320482E+00\r\n");
        bridge.clear_written();

        let row = worker.query_instruments().unwrap();
        assert_eq!(
            row.readings,
            [
                Reading::Value("9.089320482E+00".into()),
                Reading::Empty,
                Reading::Empty
            ]
        );
        assert_eq!(bridge.written(), vec!["++addr 22", "TRIG SGL"]);
    }

    #[test]
    fn test_query_temperature() {
        let (worker, bridge, _) = connected_worker();
        worker.configure(1, 22, true).unwrap();
        bridge.respond(22, "1E-03");

        let row = worker.query_instruments().unwrap();
        let Reading::Value(celsius) = &row.readings[0] else {
            panic!("expected a value, got {:?}", row.readings[0]);
        };
        let celsius: f64 = celsius.parse().unwrap();
        assert!((celsius - 24.993219514361623).abs() < 1e-9);
    }

    #[test]
    fn test_query_timeout_and_bad_temperature_become_sentinel() {
        let (worker, bridge, _) = connected_worker();
        worker.configure(1, 22, false).unwrap();
        worker.configure(2, 23, true).unwrap();
        worker.configure(3, 24, false).unwrap();
        bridge.time_out(22);
        bridge.respond(23, "12345");
        bridge.respond(24, "1.5");

        let row = worker.query_instruments().unwrap();
        assert_eq!(
            row.readings,
            [Reading::Error, Reading::Error, Reading::Value("1.5".into())]
        );
    }

    #[test]
    fn test_query_without_connection() {
        let worker = Worker::new(
            &SerialSettings::default(),
            Arc::new(RunGate::new()),
            EventBus::new(),
        );
        assert!(matches!(
            worker.query_instruments(),
            Err(LoggerError::NotConnected)
        ));
    }

    #[test]
    fn test_do_logging_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, bridge, events) = connected_worker();
        let mut rx = events.subscribe();
        worker.configure(1, 22, false).unwrap();
        worker.set_output_path(dir.path().join("log.csv")).unwrap();
        bridge.respond(22, "123\r\n");

        let row = worker.do_logging().unwrap();

        assert_eq!(rx.try_recv().unwrap(), LoggerEvent::QueryComplete(row.timestamp));
        let contents = std::fs::read_to_string(dir.path().join("log.csv")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().nth(1).unwrap().ends_with(",123,,"));
    }

    #[test]
    fn test_do_logging_reports_error_and_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, bridge, events) = connected_worker();
        let mut rx = events.subscribe();
        worker.configure(1, 22, false).unwrap();
        worker.set_output_path(dir.path().join("log.csv")).unwrap();
        bridge.time_out(22);

        let row = worker.do_logging().unwrap();

        let expected = format!("Unable to read data {}", row.simple_timestamp());
        assert_eq!(rx.try_recv().unwrap(), LoggerEvent::Error(expected));
        let contents = std::fs::read_to_string(dir.path().join("log.csv")).unwrap();
        assert!(contents.lines().nth(1).unwrap().ends_with(",#ERROR,,"));
    }

    #[test]
    fn test_shutdown_closes_writer_and_stops_gate() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, _, _) = connected_worker();
        worker.set_output_path(dir.path().join("log.csv")).unwrap();
        worker.gate.set();

        worker.shutdown().unwrap();

        assert!(worker.output_path().is_none());
        assert!(!worker.gate.is_set());
        assert!(worker.gate.is_shutdown());
    }
}
