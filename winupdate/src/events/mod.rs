//! Status sinks for user-facing progress reporting.
//!
//! The workflow reports progress to a [`StatusSink`] without waiting on it.
//! Sinks are passed explicitly to the provisioner; there is no global sink.

mod sink;

pub use sink::{
    CollectingStatusSink, LoggingStatusSink, NoOpStatusSink, StatusKind, StatusRecord,
    StatusSink,
};
