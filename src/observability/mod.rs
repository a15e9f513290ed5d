//! Observability for the replicator
//!
//! - Structured JSON line logging
//! - Typed lifecycle events
//! - Atomic replication counters
//!
//! Observability never changes replication behavior: a failed log write is
//! ignored and counters are read-only to everything but the replicator.
//!
//! # Usage
//!
//! ```ignore
//! use queuemirror::observability::{Event, Logger};
//!
//! Logger::info(Event::PollBegin.as_str(), &[("log", "/spool/job_queue.log")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, ReplicationMetrics};

/// Log a lifecycle event at INFO (or FATAL for fatal events)
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
