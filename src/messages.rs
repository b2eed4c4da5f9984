//! Notifications published by the polling worker and the controller
//!
//! Events go out on a `tokio::sync::broadcast` channel. Sending never blocks, so a
//! slow observer only risks lagging behind and missing old events; it can never
//! stall a polling pass.

use chrono::NaiveDateTime;
use log::trace;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something an observer (status bar, log, CLI) may want to show.
#[derive(Clone, Debug, PartialEq)]
pub enum LoggerEvent {
    /// The bridge controller was found and the worker is ready.
    InitComplete,
    /// A pass read every configured instrument; carries the pass timestamp.
    QueryComplete(NaiveDateTime),
    /// Something went wrong; carries a human-readable message.
    Error(String),
    /// Logging was started.
    LoggingStarted,
    /// Logging was stopped.
    LoggingStopped,
}

/// Cloneable publishing side of the event channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<LoggerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// A bus with [`EVENT_CHANNEL_CAPACITY`] slots per subscriber.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish without waiting on anyone.
    pub fn publish(&self, event: LoggerEvent) {
        if self.sender.send(event).is_err() {
            trace!("No active subscribers for logger event");
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LoggerEvent> {
        self.sender.subscribe()
    }
}
