//! Observable replication events
//!
//! Every structured log line names one of these events. Events are typed
//! so that the set of things the replicator can report is closed.

use std::fmt;

/// Observable events in the replicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Replicator constructed
    ReplicatorStart,
    /// Periodic driver stopped
    ReplicatorStop,
    /// Configuration loaded and validated
    ConfigLoaded,

    // Polling
    /// Poll started
    PollBegin,
    /// Poll finished
    PollComplete,
    /// Poll skipped by the pre-check or because the log is absent
    PollSkipped,
    /// Poll failed; retried next interval
    PollFailed,
    /// Prober classified the log
    ProbeResult,
    /// Replicator changed phase (trace only)
    PhaseChanged,

    // Replay
    /// Full rebuild started
    RebuildBegin,
    /// Full rebuild committed
    RebuildComplete,
    /// Incremental batch started
    IncrementalBegin,
    /// Incremental batch finished
    IncrementalComplete,
    /// One record applied (trace only)
    RecordApplied,
    /// Open transaction discarded at end of log
    TransactionDiscarded,

    // Generations
    /// Predecessor generation replayed
    GenerationDrained,
    /// Predecessor generation skipped
    GenerationSkipped,

    // Anomalies and failures
    /// Corrupt record contained by the parser
    CorruptRecord,
    /// Record referenced state the mirror or sink does not have
    SchemaDivergence,
    /// Sink rejected or failed a call
    SinkFailure,
    /// Persisted state cannot be trusted (FATAL)
    StateInconsistent,

    // Persistence
    /// Cursor and probe state written through the sink
    CursorPersisted,
}

impl Event {
    /// Returns the event name as written to the log
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ReplicatorStart => "REPLICATOR_START",
            Event::ReplicatorStop => "REPLICATOR_STOP",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PollBegin => "POLL_BEGIN",
            Event::PollComplete => "POLL_COMPLETE",
            Event::PollSkipped => "POLL_SKIPPED",
            Event::PollFailed => "POLL_FAILED",
            Event::ProbeResult => "PROBE_RESULT",
            Event::PhaseChanged => "PHASE_CHANGED",
            Event::RebuildBegin => "REBUILD_BEGIN",
            Event::RebuildComplete => "REBUILD_COMPLETE",
            Event::IncrementalBegin => "INCREMENTAL_BEGIN",
            Event::IncrementalComplete => "INCREMENTAL_COMPLETE",
            Event::RecordApplied => "RECORD_APPLIED",
            Event::TransactionDiscarded => "TRANSACTION_DISCARDED",
            Event::GenerationDrained => "GENERATION_DRAINED",
            Event::GenerationSkipped => "GENERATION_SKIPPED",
            Event::CorruptRecord => "CORRUPT_RECORD",
            Event::SchemaDivergence => "SCHEMA_DIVERGENCE",
            Event::SinkFailure => "SINK_FAILURE",
            Event::StateInconsistent => "STATE_INCONSISTENT",
            Event::CursorPersisted => "CURSOR_PERSISTED",
        }
    }

    /// Returns true if the event stops the replicator
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::StateInconsistent)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
