//! In-memory mirror of the job queue
//!
//! Built by replaying a log generation from offset 0 during a full
//! rebuild, exported wholesale to the sink, then discarded. It is never
//! shared across polls.

mod classad;
mod collection;
mod replay;
mod table;

pub use classad::{is_private_attribute, ClassAd, ValueKind};
pub use collection::{ExportEntry, InsertOutcome, JobQueueMirror, Partition, RemoveOutcome};
pub use replay::{apply_all, apply_record, Divergence, DivergenceReason};
pub use table::{weighted_hash, BucketTable, DEFAULT_BUCKET_COUNT};
