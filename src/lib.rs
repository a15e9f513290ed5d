//! queuemirror - job queue log replication
//!
//! Reads a batch scheduler's append-only job queue log and keeps a
//! transactional store consistent with it.
//!
//! - `joblog`: record model and byte-exact log parser
//! - `probe`: classifies what changed since the last replay
//! - `mirror`: in-memory job queue used for full rebuilds
//! - `replication`: orchestrator, sink contract and periodic driver
//! - `observability`: structured logs, events and counters

pub mod joblog;
pub mod mirror;
pub mod observability;
pub mod probe;
pub mod replication;
