//! Change classification
//!
//! `Prober::observe` does all the file I/O (read-only); `classify` is a
//! pure function of the previous state and that observation. Probing the
//! same unchanged file twice therefore yields the same answer.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::joblog::{LogError, LogParser, LogRecord, LogResult};

use super::state::{LogStat, ProbeState};

/// Whether the last replayed record is still where it was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCheck {
    /// The record at the cursor decodes to exactly the replayed record
    Matches,
    /// Missing, different, or no cursor to compare
    Diverged,
}

/// Everything read from disk during one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeObservation {
    /// Current state, `None` if the generation marker could not be read
    pub current: Option<ProbeState>,
    /// Result of re-reading the record at the cursor
    pub cursor_check: CursorCheck,
}

/// Why a full rebuild is required
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// Nothing has been replayed yet
    NeverReplayed,
    /// The log was rotated; predecessor generations may need draining
    Rotated { previous: u64, current: u64 },
    /// The file was truncated or rewritten under the cursor
    Rewritten,
}

/// Classification of the log since the last replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Replay the current generation from offset 0
    FullRebuild(RebuildReason),
    /// Resume after the cursor
    Incremental,
    /// Nothing to do
    NoChange,
    /// Could not classify; retry next poll
    ProbeError(String),
}

impl ProbeOutcome {
    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            ProbeOutcome::FullRebuild(_) => "FULL_REBUILD",
            ProbeOutcome::Incremental => "INCREMENTAL",
            ProbeOutcome::NoChange => "NO_CHANGE",
            ProbeOutcome::ProbeError(_) => "PROBE_ERROR",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::ProbeError(reason) => write!(f, "{}: {}", self.name(), reason),
            ProbeOutcome::FullRebuild(RebuildReason::Rotated { previous, current }) => {
                write!(f, "{} (rotated {} -> {})", self.name(), previous, current)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Classifies the log given the last replayed state and a fresh observation.
pub fn classify(previous: &ProbeState, observation: &ProbeObservation) -> ProbeOutcome {
    let current = match &observation.current {
        Some(current) => current,
        None => return ProbeOutcome::ProbeError("sequence marker unreadable".to_string()),
    };

    if previous.is_initial() {
        return ProbeOutcome::FullRebuild(RebuildReason::NeverReplayed);
    }

    if current.sequence_number != previous.sequence_number {
        return ProbeOutcome::FullRebuild(RebuildReason::Rotated {
            previous: previous.sequence_number,
            current: current.sequence_number,
        });
    }

    if observation.cursor_check == CursorCheck::Diverged {
        return ProbeOutcome::FullRebuild(RebuildReason::Rewritten);
    }

    if current.size == previous.size {
        ProbeOutcome::NoChange
    } else if current.size > previous.size {
        ProbeOutcome::Incremental
    } else {
        ProbeOutcome::ProbeError(format!(
            "log shrank from {} to {} bytes but the cursor record is intact",
            previous.size, current.size
        ))
    }
}

/// Read-only prober bound to one log path
#[derive(Debug, Clone)]
pub struct Prober {
    path: PathBuf,
}

impl Prober {
    /// Creates a prober for the log at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path being probed
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current state and re-reads the record at `cursor`.
    pub fn observe(&self, cursor: Option<&LogRecord>) -> LogResult<ProbeObservation> {
        let mut parser = LogParser::open(&self.path)?;
        let stat = LogStat::read(&self.path).map_err(|e| LogError::read_failed(0, e))?;

        let current = parser
            .read_sequence_marker()?
            .map(|(sequence, created)| ProbeState::from_parts(stat, sequence, created));

        let cursor_check = match cursor {
            Some(expected) => match parser.read_record_at(expected.offset)? {
                Some(found) if &found == expected => CursorCheck::Matches,
                _ => CursorCheck::Diverged,
            },
            None => CursorCheck::Diverged,
        };

        Ok(ProbeObservation {
            current,
            cursor_check,
        })
    }

    /// Observes and classifies in one step.
    ///
    /// I/O failures are folded into `ProbeError`. The observation is
    /// returned alongside so the caller can persist the current state.
    pub fn probe(
        &self,
        previous: &ProbeState,
        cursor: Option<&LogRecord>,
    ) -> (ProbeOutcome, Option<ProbeState>) {
        match self.observe(cursor) {
            Ok(observation) => (classify(previous, &observation), observation.current),
            Err(e) => (ProbeOutcome::ProbeError(e.to_string()), None),
        }
    }
}
