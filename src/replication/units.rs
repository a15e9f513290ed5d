//! Replay units
//!
//! With transactional grouping a unit is either a single record outside a
//! transaction or a complete `105 … 106` group, markers included, so the
//! last record of a unit is always a safe cursor. A group still open at
//! end of log, or interrupted by another `105`, is discarded and never
//! reaches the mirror or the sink. Without grouping every record is its
//! own unit.
//!
//! A corrupt record closed by a later `106` is skipped: the open group is
//! discarded and reading resumes after that marker. Corruption with no
//! closing marker ends the pass at the last good record.

use crate::joblog::{CorruptionReport, LogOperation, LogParser, LogRecord, LogResult, ReadOutcome};
use crate::observability::{Event, Logger};

/// Reads units from a positioned parser
pub struct UnitReader<'a> {
    parser: &'a mut LogParser,
    grouping: bool,
    discarded: u64,
    corruptions: u64,
    last_corruption: Option<CorruptionReport>,
}

impl<'a> UnitReader<'a> {
    /// Wraps a parser; reading starts at its current position
    pub fn new(parser: &'a mut LogParser, grouping: bool) -> Self {
        Self {
            parser,
            grouping,
            discarded: 0,
            corruptions: 0,
            last_corruption: None,
        }
    }

    /// Transactions discarded so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Corrupt regions contained so far
    pub fn corruptions(&self) -> u64 {
        self.corruptions
    }

    /// Most recent corrupt region
    pub fn last_corruption(&self) -> Option<&CorruptionReport> {
        self.last_corruption.as_ref()
    }

    /// Next complete unit, or `None` at end of log
    pub fn next_unit(&mut self) -> LogResult<Option<Vec<LogRecord>>> {
        let mut open: Option<Vec<LogRecord>> = None;

        loop {
            let record = match self.parser.read_next()? {
                ReadOutcome::Record(record) => record,
                ReadOutcome::EndOfLog => match self.parser.corruption().cloned() {
                    Some(report) => {
                        if let Some(group) = open.take() {
                            self.discard(&group, "corrupt record");
                        }
                        self.corruptions += 1;
                        let resume = report.closed_by_end_transaction.then_some(report.boundary);
                        self.last_corruption = Some(report);
                        match resume {
                            Some(boundary) => {
                                self.parser.seek(boundary)?;
                                continue;
                            }
                            None => return Ok(None),
                        }
                    }
                    None => {
                        if let Some(group) = open {
                            self.discard(&group, "end of log");
                        }
                        return Ok(None);
                    }
                },
            };

            if !self.grouping {
                return Ok(Some(vec![record]));
            }

            match open.as_mut() {
                None => {
                    if record.operation == LogOperation::BeginTransaction {
                        open = Some(vec![record]);
                    } else {
                        return Ok(Some(vec![record]));
                    }
                }
                Some(group) => match record.operation {
                    LogOperation::BeginTransaction => {
                        let stale = std::mem::replace(group, vec![record]);
                        self.discard(&stale, "begin inside open transaction");
                    }
                    LogOperation::EndTransaction => {
                        group.push(record);
                        return Ok(open.take());
                    }
                    _ => group.push(record),
                },
            }
        }
    }

    fn discard(&mut self, group: &[LogRecord], reason: &str) {
        self.discarded += 1;
        let offset = group.first().map(|r| r.offset).unwrap_or(0);
        Logger::warn(
            Event::TransactionDiscarded.as_str(),
            &[
                ("log", self.parser.path().display().to_string().as_str()),
                ("offset", offset.to_string().as_str()),
                ("reason", reason),
                ("records", group.len().to_string().as_str()),
            ],
        );
    }
}
