//! Status sink trait and implementations.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Level};

/// Trait for sinks receiving user-facing status notifications.
///
/// All methods are fire-and-forget: they must not block the workflow and
/// must never fail.
pub trait StatusSink: Send + Sync {
    /// Reports a headline status line.
    fn say(&self, message: &str);

    /// Reports a detail line, such as remote command output.
    fn message(&self, message: &str);

    /// Reports an error line.
    fn error(&self, message: &str);

    /// Reports a structured event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "provision.state")
    /// * `data` - Optional event data
    fn event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let _ = (event_type, data);
    }
}

/// A no-op sink that discards all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStatusSink;

impl StatusSink for NoOpStatusSink {
    fn say(&self, _message: &str) {}

    fn message(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

/// A sink that forwards notifications to the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingStatusSink {
    /// The log level used for `say` and `event`.
    level: Level,
}

impl Default for LoggingStatusSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingStatusSink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log(&self, message: &str) {
        if self.level == Level::DEBUG || self.level == Level::TRACE {
            debug!(status = %message, "{}", message);
        } else {
            info!(status = %message, "{}", message);
        }
    }
}

impl StatusSink for LoggingStatusSink {
    fn say(&self, message: &str) {
        self.log(message);
    }

    fn message(&self, message: &str) {
        debug!(output = %message, "{}", message);
    }

    fn error(&self, message: &str) {
        warn!(output = %message, "{}", message);
    }

    fn event(&self, event_type: &str, data: Option<serde_json::Value>) {
        if self.level == Level::ERROR {
            error!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

/// The kind of a recorded notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// A headline line.
    Say,
    /// A detail line.
    Message,
    /// An error line.
    Error,
    /// A structured event.
    Event,
}

/// A notification captured by [`CollectingStatusSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// The notification kind.
    pub kind: StatusKind,
    /// The message text, or the event type for events.
    pub text: String,
    /// Event data, for events only.
    pub data: Option<serde_json::Value>,
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingStatusSink {
    records: RwLock<Vec<StatusRecord>>,
}

impl CollectingStatusSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected records.
    #[must_use]
    pub fn records(&self) -> Vec<StatusRecord> {
        self.records.read().clone()
    }

    /// Returns the text of records of the given kind.
    #[must_use]
    pub fn texts(&self, kind: StatusKind) -> Vec<String> {
        self.records
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.text.clone())
            .collect()
    }

    /// Returns the data of events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<Option<serde_json::Value>> {
        self.records
            .read()
            .iter()
            .filter(|r| r.kind == StatusKind::Event && r.text.starts_with(type_prefix))
            .map(|r| r.data.clone())
            .collect()
    }

    /// Returns the number of collected records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn push(&self, kind: StatusKind, text: &str, data: Option<serde_json::Value>) {
        self.records.write().push(StatusRecord {
            kind,
            text: text.to_string(),
            data,
        });
    }
}

impl StatusSink for CollectingStatusSink {
    fn say(&self, message: &str) {
        self.push(StatusKind::Say, message, None);
    }

    fn message(&self, message: &str) {
        self.push(StatusKind::Message, message, None);
    }

    fn error(&self, message: &str) {
        self.push(StatusKind::Error, message, None);
    }

    fn event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(StatusKind::Event, event_type, data);
    }
}
