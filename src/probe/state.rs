//! Probe inputs
//!
//! `LogStat` is the cheap filesystem view of the log. `ProbeState` adds the
//! generation identity read from the marker record and is the unit that is
//! persisted after a successful replay.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Modification time and length of a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStat {
    /// Modification time, nanoseconds since the unix epoch
    pub modified_time: u64,
    /// Length in bytes
    pub size: u64,
}

impl LogStat {
    /// Stats the file at `path`.
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified_time = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Ok(Self {
            modified_time,
            size: metadata.len(),
        })
    }
}

/// Log position and generation as seen by one probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeState {
    /// Modification time, nanoseconds since the unix epoch
    pub modified_time: u64,
    /// Length in bytes; zero means the log has never been replayed
    pub size: u64,
    /// Generation sequence number from the marker record
    pub sequence_number: u64,
    /// Generation creation time (unix seconds) from the marker record
    pub creation_time: i64,
}

impl ProbeState {
    /// Combines a stat with the generation marker
    pub fn from_parts(stat: LogStat, sequence_number: u64, creation_time: i64) -> Self {
        Self {
            modified_time: stat.modified_time,
            size: stat.size,
            sequence_number,
            creation_time,
        }
    }

    /// True if nothing was ever replayed from this state
    pub fn is_initial(&self) -> bool {
        self.size == 0
    }

    /// True if `stat` shows the file unchanged since this state was taken
    pub fn unchanged_since(&self, stat: &LogStat) -> bool {
        !self.is_initial() && self.modified_time == stat.modified_time && self.size == stat.size
    }
}
