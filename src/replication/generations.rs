//! Rotated log generations
//!
//! When the scheduler rotates its log, the old generation is renamed to
//! `<log>.<sequence>` and a new file starts with the next sequence number.
//! Records written to a generation after our last poll exist only in that
//! renamed file, so they are replayed before the current log is rebuilt.

use std::ops::Range;
use std::path::Path;

use crate::joblog::LogParser;

/// Generations to drain and where to start in the first one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainPlan {
    /// Sequence numbers, ascending, current generation excluded
    pub generations: Range<u64>,
    /// Offset to resume from in the first generation
    pub resume_offset: u64,
}

impl DrainPlan {
    /// Plan for a rotation from `previous` to `current`
    pub fn new(previous: u64, current: u64, resume_offset: u64) -> Self {
        let end = current.max(previous);
        Self {
            generations: previous..end,
            resume_offset,
        }
    }

    /// True if there is nothing to drain
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Offset to start reading `generation` from
    pub fn start_offset(&self, generation: u64) -> u64 {
        if generation == self.generations.start {
            self.resume_offset
        } else {
            0
        }
    }

    /// True if `generation` follows an earlier drained generation
    pub fn is_subsequent(&self, generation: u64) -> bool {
        generation != self.generations.start
    }
}

/// A predecessor generation ready to read, or why it was skipped
pub enum GenerationSource {
    /// Positioned at the start offset
    Ready(LogParser),
    /// Could not be used
    Skipped(String),
}

/// Opens generation `expected` at `path` positioned at `start`.
///
/// Never fails: anything that makes the file unusable becomes `Skipped`.
pub fn open_generation(path: &Path, expected: u64, start: u64) -> GenerationSource {
    let mut parser = match LogParser::open(path) {
        Ok(parser) => parser,
        Err(e) => return GenerationSource::Skipped(e.to_string()),
    };

    match parser.read_sequence_marker() {
        Ok(Some((sequence, _))) if sequence == expected => {}
        Ok(Some((sequence, _))) => {
            return GenerationSource::Skipped(format!(
                "marker names generation {}, expected {}",
                sequence, expected
            ))
        }
        Ok(None) => return GenerationSource::Skipped("sequence marker missing".to_string()),
        Err(e) => return GenerationSource::Skipped(e.to_string()),
    }

    match parser.seek(start) {
        Ok(()) => GenerationSource::Ready(parser),
        Err(e) => GenerationSource::Skipped(e.to_string()),
    }
}
