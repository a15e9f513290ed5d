//! Resumption state
//!
//! The only state carried between polls. It is persisted through the sink
//! as a single row: the JSON payload plus a CRC32 of that payload. A row
//! that fails the checksum, does not decode, or contradicts itself is
//! never used; the replicator stops instead.

use chrono::Utc;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::joblog::{LogOperation, LogRecord};
use crate::probe::ProbeState;

use super::errors::{ReplicationError, ReplicationResult};

/// Version of the persisted payload layout
pub const STATE_FORMAT_VERSION: u32 = 1;

/// The last record fully applied to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionCursor {
    pub offset: u64,
    pub next_offset: u64,
    pub operation: LogOperation,
}

impl ResumptionCursor {
    /// Cursor positioned after `record`
    pub fn after(record: &LogRecord) -> Self {
        Self {
            offset: record.offset,
            next_offset: record.next_offset,
            operation: record.operation.clone(),
        }
    }

    /// The record the cursor stands on
    pub fn to_record(&self) -> LogRecord {
        LogRecord::new(self.offset, self.next_offset, self.operation.clone())
    }
}

/// Probe state and cursor as of the last successful batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingState {
    pub format_version: u32,
    pub probe: ProbeState,
    pub cursor: Option<ResumptionCursor>,
    /// RFC 3339 time the state was written
    pub last_poll_time: Option<String>,
}

impl Default for PollingState {
    fn default() -> Self {
        Self::initial()
    }
}

impl PollingState {
    /// State of a replicator that has never replayed anything
    pub fn initial() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            probe: ProbeState::default(),
            cursor: None,
            last_poll_time: None,
        }
    }

    /// State after applying up to `cursor`.
    ///
    /// The recorded size is raised to cover the cursor, so a cursor never
    /// lies beyond the size it was persisted with.
    pub fn advanced(probe: ProbeState, cursor: Option<ResumptionCursor>) -> Self {
        let mut probe = probe;
        if let Some(c) = &cursor {
            probe.size = probe.size.max(c.next_offset);
        }
        Self {
            format_version: STATE_FORMAT_VERSION,
            probe,
            cursor,
            last_poll_time: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Checks the state for internal contradictions
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.format_version != STATE_FORMAT_VERSION {
            return Err(ReplicationError::state_inconsistent(format!(
                "unsupported state format version {}",
                self.format_version
            )));
        }

        if let Some(cursor) = &self.cursor {
            if cursor.next_offset <= cursor.offset {
                return Err(ReplicationError::state_inconsistent(format!(
                    "cursor next_offset {} does not follow offset {}",
                    cursor.next_offset, cursor.offset
                )));
            }
            if cursor.next_offset > self.probe.size {
                return Err(ReplicationError::state_inconsistent(format!(
                    "cursor next_offset {} lies beyond recorded size {}",
                    cursor.next_offset, self.probe.size
                )));
            }
        }

        Ok(())
    }

    /// Record at the cursor, for the prober's comparison
    pub fn cursor_record(&self) -> Option<LogRecord> {
        self.cursor.as_ref().map(ResumptionCursor::to_record)
    }
}

/// Persisted form of `PollingState`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRow {
    /// JSON-encoded `PollingState`
    pub payload: String,
    /// CRC32 of `payload`
    pub checksum: u32,
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

impl StateRow {
    /// Encodes and checksums a state
    pub fn seal(state: &PollingState) -> ReplicationResult<Self> {
        let payload = serde_json::to_string(state).map_err(|e| {
            ReplicationError::state_inconsistent(format!("failed to encode state: {}", e))
        })?;
        let checksum = compute_checksum(payload.as_bytes());
        Ok(Self { payload, checksum })
    }

    /// Verifies, decodes and validates a persisted state
    pub fn unseal(&self) -> ReplicationResult<PollingState> {
        let actual = compute_checksum(self.payload.as_bytes());
        if actual != self.checksum {
            return Err(ReplicationError::state_inconsistent(format!(
                "state checksum mismatch: stored {:08x}, computed {:08x}",
                self.checksum, actual
            )));
        }

        let state: PollingState = serde_json::from_str(&self.payload).map_err(|e| {
            ReplicationError::state_inconsistent(format!("failed to decode state: {}", e))
        })?;
        state.validate()?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::errors::ReplicationErrorKind;

    fn cursor(offset: u64, next_offset: u64) -> ResumptionCursor {
        ResumptionCursor {
            offset,
            next_offset,
            operation: LogOperation::EndTransaction,
        }
    }

    fn probe(size: u64) -> ProbeState {
        ProbeState {
            modified_time: 7,
            size,
            sequence_number: 2,
            creation_time: 100,
        }
    }

    #[test]
    fn test_seal_unseal() {
        let state = PollingState::advanced(probe(120), Some(cursor(100, 104)));
        let row = StateRow::seal(&state).unwrap();
        assert_eq!(row.unseal().unwrap(), state);
        assert!(state.last_poll_time.is_some());
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let state = PollingState::advanced(probe(120), Some(cursor(100, 104)));
        let mut row = StateRow::seal(&state).unwrap();
        row.payload = row.payload.replace("120", "121");

        let err = row.unseal().unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::StateInconsistent);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_advanced_covers_cursor() {
        let state = PollingState::advanced(probe(50), Some(cursor(60, 80)));
        assert_eq!(state.probe.size, 80);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_cursor_beyond_size_rejected() {
        let mut state = PollingState::advanced(probe(120), Some(cursor(100, 104)));
        state.probe.size = 90;
        assert!(state.validate().is_err());

        let row = StateRow::seal(&state).unwrap();
        assert!(row.unseal().unwrap_err().is_fatal());
    }

    #[test]
    fn test_backwards_cursor_rejected() {
        let state = PollingState {
            cursor: Some(cursor(40, 30)),
            ..PollingState::advanced(probe(120), None)
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_initial_state_valid() {
        let state = PollingState::initial();
        assert!(state.validate().is_ok());
        assert!(state.probe.is_initial());
        assert!(state.cursor_record().is_none());
    }

    #[test]
    fn test_cursor_record_roundtrip() {
        let record = LogRecord::new(10, 14, LogOperation::BeginTransaction);
        let cursor = ResumptionCursor::after(&record);
        assert_eq!(cursor.to_record(), record);
    }
}
