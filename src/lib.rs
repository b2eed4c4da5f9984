//! Core library for the gpib_datalogger application.
//!
//! Polls up to three multimeters through a single serial-to-GPIB bridge,
//! optionally converts thermocouple voltages to temperatures, and appends one
//! timestamped row per polling pass to a CSV file. A front end or the headless
//! binary both drive it through [`app::LoggingController`].

pub mod adapters;
pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod messages;
pub mod worker;
