//! Job queue log subsystem
//!
//! The scheduler records every mutation of its job queue as a line in an
//! append-only text log. This module models those records and reads them
//! back with exact byte addressing.
//!
//! # Guarantees
//!
//! - `next_offset` of a record equals `offset` of the record after it
//! - A partially written trailing record is reported as end of log
//! - A corrupt record stops reading at the last good record; it is never
//!   fatal to the caller

mod errors;
mod key;
mod parser;
mod record;

pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use key::{JobKey, CLUSTER_SENTINEL, KEY_DELIMITER};
pub use parser::{CorruptionReport, LogParser, ReadOutcome};
pub use record::{LogOperation, LogRecord, OpCode, CREATION_TIMESTAMP_LABEL};
