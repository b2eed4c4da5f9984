//! Helpers shared by the integration tests.
#![allow(dead_code)]

use gpib_datalogger::{
    adapters::{MockBridge, MockResourceManager},
    config::SerialSettings,
    messages::EventBus,
    worker::{RunGate, Worker},
};
use std::path::Path;
use std::sync::Arc;

/// Serial settings with no bridge settle delay.
pub fn fast_serial() -> SerialSettings {
    SerialSettings {
        settle_ms: 0,
        ..SerialSettings::default()
    }
}

/// Worker that has not discovered a bridge yet.
pub fn create_idle_worker() -> (Worker, EventBus) {
    let events = EventBus::new();
    let worker = Worker::new(&fast_serial(), Arc::new(RunGate::new()), events.clone());
    (worker, events)
}

/// Worker connected to a scripted controller on COM1.
pub fn create_test_worker() -> (Worker, MockBridge, EventBus) {
    let (worker, events) = create_idle_worker();
    let bridge = MockBridge::controller("COM1");
    let rm = MockResourceManager::empty().with_bridge(bridge.clone());
    worker
        .init_connection(&rm)
        .expect("Failed to connect to mock bridge");
    (worker, bridge, events)
}

/// Data rows of a log file, header skipped.
pub fn data_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).expect("Failed to open log");
    reader
        .records()
        .map(|r| r.expect("Bad CSV record").iter().map(String::from).collect())
        .collect()
}
