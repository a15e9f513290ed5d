//! Change probe
//!
//! Decides, from file metadata and the generation marker, whether the
//! mirror needs a full rebuild, an incremental catch-up, or nothing.

mod prober;
mod state;

pub use prober::{
    classify, CursorCheck, ProbeObservation, ProbeOutcome, Prober, RebuildReason,
};
pub use state::{LogStat, ProbeState};
