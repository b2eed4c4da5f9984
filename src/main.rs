//! Headless runner: discover the bridge, configure instruments, log until Ctrl-C.
//!
//! ```bash
//! gpib_datalogger --output readings.csv --interval 1 --instrument 1:22 --instrument 2:23:temp
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use gpib_datalogger::{
    adapters::SerialResourceManager,
    app::LoggingController,
    config::{InstrumentSettings, Settings},
    messages::LoggerEvent,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser, Debug)]
#[command(name = "gpib_datalogger", version, about = "Log GPIB multimeter readings to CSV")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV file to log into
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds between polling passes
    #[arg(short, long)]
    interval: Option<f64>,

    /// Instrument as SLOT:ADDRESS, or SLOT:ADDRESS:temp to log temperature
    #[arg(long = "instrument", value_name = "SLOT:ADDRESS[:temp]")]
    instruments: Vec<InstrumentArg>,

    /// Log filter, overrides the configuration file (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Clone, Debug)]
struct InstrumentArg(InstrumentSettings);

impl FromStr for InstrumentArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let slot = parts
            .next()
            .ok_or_else(|| anyhow!("missing slot in '{s}'"))?
            .parse()
            .with_context(|| format!("invalid slot in '{s}'"))?;
        let address = parts
            .next()
            .ok_or_else(|| anyhow!("missing address in '{s}'"))?
            .parse()
            .with_context(|| format!("invalid address in '{s}'"))?;
        let convert_to_temperature = match parts.next() {
            None => false,
            Some("temp") => true,
            Some(other) => bail!("unknown instrument flag '{other}', expected 'temp'"),
        };
        if parts.next().is_some() {
            bail!("too many fields in '{s}'");
        }

        Ok(Self(InstrumentSettings {
            slot,
            address,
            convert_to_temperature,
        }))
    }
}

fn merge_cli(mut settings: Settings, cli: Cli) -> Settings {
    if let Some(output) = cli.output {
        settings.logging.output_path = Some(output);
    }
    if let Some(interval) = cli.interval {
        settings.logging.interval_secs = Some(interval);
    }
    if let Some(level) = cli.log_level {
        settings.logging.log_level = level;
    }
    for InstrumentArg(instrument) in cli.instruments {
        settings.instruments.retain(|i| i.slot != instrument.slot);
        settings.instruments.push(instrument);
    }
    settings
}

/// Relay notifications to the log until the channel closes.
async fn log_events(mut rx: broadcast::Receiver<LoggerEvent>) {
    loop {
        match rx.recv().await {
            Ok(LoggerEvent::InitComplete) => info!("Bridge controller ready"),
            Ok(LoggerEvent::QueryComplete(timestamp)) => info!("Readings taken at {timestamp}"),
            Ok(LoggerEvent::Error(message)) => error!("{message}"),
            Ok(LoggerEvent::LoggingStarted) => info!("Logging started"),
            Ok(LoggerEvent::LoggingStopped) => info!("Logging stopped"),
            Err(RecvError::Lagged(skipped)) => warn!("Missed {skipped} logger events"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let settings = merge_cli(settings, cli);
    settings.validate().context("Invalid configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.logging.log_level.as_str()),
    )
    .init();

    let controller = Arc::new(LoggingController::new(&settings));
    let mut init_rx = controller.subscribe();
    tokio::spawn(log_events(controller.subscribe()));

    controller
        .start_worker(SerialResourceManager::new(settings.serial.clone()))
        .context("Failed to start polling worker")?;

    loop {
        match init_rx.recv().await {
            Ok(LoggerEvent::InitComplete) => break,
            Ok(LoggerEvent::Error(message)) => bail!("Bridge discovery failed: {message}"),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("Polling worker exited during discovery"),
        }
    }

    // Device initialization is blocking serial I/O
    let configured = {
        let controller = controller.clone();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || controller.apply_settings(&settings))
            .await
            .context("Configuration task panicked")?
    };
    configured.context("Failed to apply configuration")?;

    if !controller.start() {
        controller.shutdown()?;
        bail!("Logging not started: set an instrument address, a positive interval and an output file");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    controller.stop();
    let controller_for_shutdown = controller.clone();
    tokio::task::spawn_blocking(move || controller_for_shutdown.shutdown())
        .await
        .context("Shutdown task panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_arg() {
        let InstrumentArg(plain) = "1:22".parse().unwrap();
        assert_eq!(plain.slot, 1);
        assert_eq!(plain.address, 22);
        assert!(!plain.convert_to_temperature);

        let InstrumentArg(temp) = "3:9:temp".parse().unwrap();
        assert_eq!(temp.slot, 3);
        assert!(temp.convert_to_temperature);

        assert!("1".parse::<InstrumentArg>().is_err());
        assert!("x:22".parse::<InstrumentArg>().is_err());
        assert!("1:22:volts".parse::<InstrumentArg>().is_err());
    }

    #[test]
    fn test_cli_overrides_config_slot() {
        let mut settings = Settings::default();
        settings.instruments.push(InstrumentSettings {
            slot: 1,
            address: 5,
            convert_to_temperature: false,
        });
        let cli = Cli::parse_from(["gpib_datalogger", "--instrument", "1:22:temp", "-i", "2.5"]);

        let merged = merge_cli(settings, cli);
        assert_eq!(merged.instruments.len(), 1);
        assert_eq!(merged.instruments[0].address, 22);
        assert_eq!(merged.logging.interval_secs, Some(2.5));
    }
}
