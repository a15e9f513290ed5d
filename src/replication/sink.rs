//! Downstream sink contract
//!
//! The replicator addresses its store only through this trait. Every
//! mutation and every state write happens between `begin` and `commit`;
//! nothing staged is visible to readers until `commit` succeeds.

use thiserror::Error;

use crate::joblog::JobKey;
use crate::mirror::{ClassAd, Partition};

use super::cursor::StateRow;
use super::mutation::SinkMutation;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Sink errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("No transaction is open")]
    NoTransaction,

    #[error("A transaction is already open")]
    TransactionOpen,

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Mutation rejected: {0}")]
    Rejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the sink handled an executed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The mutation changed the store
    Applied,
    /// The target record does not exist; nothing changed
    MissingTarget,
    /// The record already exists; nothing changed
    Duplicate,
}

/// Read-only questions a sink can answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkQuery {
    /// One record by partition and key
    Lookup { partition: Partition, key: JobKey },
    /// Number of records in a partition
    Count { partition: Partition },
}

/// Answer to a `SinkQuery`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Record(Option<ClassAd>),
    Count(usize),
}

/// A transactional store kept consistent with the log
pub trait ReplicationSink: Send {
    /// Opens a transaction
    fn begin(&mut self) -> SinkResult<()>;

    /// Makes the open transaction visible
    fn commit(&mut self) -> SinkResult<()>;

    /// Discards the open transaction
    fn rollback(&mut self) -> SinkResult<()>;

    /// Executes one mutation inside the open transaction
    fn execute(&mut self, mutation: &SinkMutation) -> SinkResult<ExecOutcome>;

    /// Answers a query against committed contents
    fn query(&self, query: &SinkQuery) -> SinkResult<QueryAnswer>;

    /// Reads the committed resumption state row
    fn load_state(&self) -> SinkResult<Option<StateRow>>;

    /// Writes the resumption state row inside the open transaction
    fn store_state(&mut self, row: &StateRow) -> SinkResult<()>;
}
