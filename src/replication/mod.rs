//! Replication subsystem
//!
//! Keeps a downstream sink consistent with the job queue log:
//! - Probes the log each poll and picks rebuild, catch-up, or nothing
//! - Replays whole `105 … 106` groups or nothing of them
//! - Drains rotated predecessor generations before rebuilding
//! - Persists the resumption cursor in the same sink transaction as the
//!   mutations it covers
//!
//! A fatal error means the persisted state cannot be trusted; the driver
//! stops and nothing is written until an operator intervenes.

mod config;
mod cursor;
mod driver;
mod errors;
mod generations;
mod memory_sink;
mod mutation;
mod orchestrator;
mod sink;
mod units;

pub use config::ReplicatorConfig;
pub use cursor::{PollingState, ResumptionCursor, StateRow, STATE_FORMAT_VERSION};
pub use driver::run;
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
pub use generations::{open_generation, DrainPlan, GenerationSource};
pub use memory_sink::MemorySink;
pub use mutation::{translate, SinkMutation};
pub use orchestrator::{PollOutcome, PollReport, Replicator, ReplicatorPhase, SkipReason};
pub use sink::{ExecOutcome, QueryAnswer, ReplicationSink, SinkError, SinkQuery, SinkResult};
pub use units::UnitReader;
