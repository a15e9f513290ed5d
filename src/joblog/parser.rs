//! Offset-tracking job queue log parser
//!
//! The scheduler appends to the log while we read it, without locking.
//! The grammar is self-delimiting, so a partially written trailing record
//! shows up as `EndOfLog` (it is re-read once complete) and never as wrong
//! data.
//!
//! # Corruption policy
//!
//! A malformed record is never fatal. The parser scans forward line by line
//! for an `EndTransaction` marker, records a `CorruptionReport` whose
//! boundary is the position after that marker (or EOF), and from then on
//! answers `EndOfLog` until it is re-seeked. The cursor therefore stays on
//! the last good record and no partial transaction is ever applied.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::observability::{Event, Logger};

use super::errors::{LogError, LogResult};
use super::record::{LogOperation, LogRecord, OpCode};

/// Result of a successful read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, well-formed record
    Record(LogRecord),
    /// No further complete record is available
    EndOfLog,
}

/// Where and why a corrupt record stopped the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    /// Offset of the corrupt record
    pub offset: u64,
    /// What was wrong with it
    pub reason: String,
    /// Position after the discarded region
    pub boundary: u64,
    /// Whether an `EndTransaction` line closed the discarded region
    pub closed_by_end_transaction: bool,
}

// Internal outcome before recovery is applied.
enum RawRead {
    Record(LogRecord),
    EndOfLog,
    Corrupt { offset: u64, reason: String },
}

// Why a field could not be produced.
enum FieldFault {
    Eof,
    Malformed(String),
    Io(io::Error),
}

impl From<io::Error> for FieldFault {
    fn from(e: io::Error) -> Self {
        FieldFault::Io(e)
    }
}

type FieldResult<T> = Result<T, FieldFault>;

/// Sequential reader over one log file generation.
pub struct LogParser {
    /// Path of the log file
    path: PathBuf,
    /// Buffered handle
    reader: BufReader<File>,
    /// Byte position of the next unread byte
    position: u64,
    /// True when `position` is at the start of a line
    line_start: bool,
    /// Set once a corrupt record has been contained
    corruption: Option<CorruptionReport>,
}

impl LogParser {
    /// Opens a log file positioned at offset 0.
    pub fn open(path: &Path) -> LogResult<Self> {
        let file = File::open(path).map_err(|e| {
            LogError::open_failed(format!("failed to open log {}", path.display()), e)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            position: 0,
            line_start: true,
            corruption: None,
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current length of the file on disk
    pub fn file_size(&self) -> LogResult<u64> {
        self.reader
            .get_ref()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| LogError::read_failed(self.position, e))
    }

    /// Corruption contained since the last seek, if any
    pub fn corruption(&self) -> Option<&CorruptionReport> {
        self.corruption.as_ref()
    }

    /// Repositions the parser.
    ///
    /// # Errors
    ///
    /// `QM_LOG_OFFSET_OUT_OF_RANGE` if `offset` lies past the end of the file.
    pub fn seek(&mut self, offset: u64) -> LogResult<()> {
        let size = self.file_size()?;
        if offset > size {
            return Err(LogError::offset_out_of_range(offset, size));
        }
        self.reposition(offset)?;
        self.corruption = None;
        Ok(())
    }

    /// Reads the next record.
    ///
    /// Corrupt records are contained per the module-level policy and
    /// surface as `EndOfLog`. Only I/O failures are returned as errors.
    pub fn read_next(&mut self) -> LogResult<ReadOutcome> {
        if self.corruption.is_some() {
            return Ok(ReadOutcome::EndOfLog);
        }

        match self.read_raw()? {
            RawRead::Record(record) => Ok(ReadOutcome::Record(record)),
            RawRead::EndOfLog => Ok(ReadOutcome::EndOfLog),
            RawRead::Corrupt { offset, reason } => {
                self.contain_corruption(offset, reason)?;
                Ok(ReadOutcome::EndOfLog)
            }
        }
    }

    /// Reads the record that starts at `offset` without corruption recovery.
    ///
    /// Returns `None` when the offset is past the end of the file or no
    /// complete, well-formed record starts there.
    pub fn read_record_at(&mut self, offset: u64) -> LogResult<Option<LogRecord>> {
        if offset > self.file_size()? {
            return Ok(None);
        }
        self.reposition(offset)?;
        self.corruption = None;

        match self.read_raw()? {
            RawRead::Record(record) if record.offset == offset => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Reads the generation marker at offset 0.
    ///
    /// Returns `(sequence_number, creation_time)`, or `None` if the first
    /// record is missing or is not a marker.
    pub fn read_sequence_marker(&mut self) -> LogResult<Option<(u64, i64)>> {
        match self.read_record_at(0)? {
            Some(LogRecord {
                operation:
                    LogOperation::SequenceMarker {
                        sequence_number,
                        creation_time,
                    },
                ..
            }) => Ok(Some((sequence_number, creation_time))),
            _ => Ok(None),
        }
    }

    fn reposition(&mut self, offset: u64) -> LogResult<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| LogError::read_failed(offset, e))?;
        self.position = offset;
        self.line_start = true;
        Ok(())
    }

    fn read_raw(&mut self) -> LogResult<RawRead> {
        let start = self.position;

        let result = self.read_record_body(start);
        match result {
            Ok(operation) => Ok(RawRead::Record(LogRecord::new(
                start,
                self.position,
                operation,
            ))),
            Err(FieldFault::Eof) => {
                // Partial trailing write: forget the bytes consumed so far.
                self.reposition(start)?;
                Ok(RawRead::EndOfLog)
            }
            Err(FieldFault::Malformed(reason)) => Ok(RawRead::Corrupt {
                offset: start,
                reason,
            }),
            Err(FieldFault::Io(e)) => Err(LogError::read_failed(self.position, e)),
        }
    }

    fn read_record_body(&mut self, start: u64) -> FieldResult<LogOperation> {
        self.skip_whitespace()?;
        let op_word = self.read_word("op code")?;
        let op = op_word
            .parse::<i64>()
            .ok()
            .and_then(OpCode::from_code)
            .ok_or_else(|| {
                FieldFault::Malformed(format!("unknown op code '{}' at {}", op_word, start))
            })?;

        let operation = match op {
            OpCode::NewClassAd => {
                let key = self.read_word("key")?;
                let my_type = self.read_word("my type")?;
                let target_type = self.read_word("target type")?;
                self.expect_terminator()?;
                LogOperation::NewClassAd {
                    key,
                    my_type,
                    target_type,
                }
            }
            OpCode::DestroyClassAd => {
                let key = self.read_word("key")?;
                self.expect_terminator()?;
                LogOperation::DestroyClassAd { key }
            }
            OpCode::SetAttribute => {
                let key = self.read_word("key")?;
                let name = self.read_word("attribute name")?;
                // The value line carries its own terminator.
                let value = self.read_value_line()?;
                LogOperation::SetAttribute { key, name, value }
            }
            OpCode::DeleteAttribute => {
                let key = self.read_word("key")?;
                let name = self.read_word("attribute name")?;
                self.expect_terminator()?;
                LogOperation::DeleteAttribute { key, name }
            }
            OpCode::BeginTransaction => {
                self.expect_terminator()?;
                LogOperation::BeginTransaction
            }
            OpCode::EndTransaction => {
                self.expect_terminator()?;
                LogOperation::EndTransaction
            }
            OpCode::HistoricalSequenceNumber => {
                let sequence = self.read_word("sequence number")?;
                let _label = self.read_word("timestamp label")?;
                let created = self.read_word("creation time")?;
                self.expect_terminator()?;
                LogOperation::SequenceMarker {
                    sequence_number: sequence.parse().map_err(|_| {
                        FieldFault::Malformed(format!("bad sequence number '{}'", sequence))
                    })?,
                    creation_time: created.parse().map_err(|_| {
                        FieldFault::Malformed(format!("bad creation time '{}'", created))
                    })?,
                }
            }
        };

        Ok(operation)
    }

    // --- byte level -------------------------------------------------------

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if let Some(b) = byte {
            self.reader.consume(1);
            self.position += 1;
            self.line_start = b == b'\n';
        }
        Ok(byte)
    }

    // Skips blank lines and spaces before an op code.
    fn skip_whitespace(&mut self) -> FieldResult<()> {
        while let Some(b) = self.peek_byte()? {
            if !b.is_ascii_whitespace() {
                return Ok(());
            }
            self.next_byte()?;
        }
        Err(FieldFault::Eof)
    }

    fn skip_inline_space(&mut self) -> io::Result<()> {
        while let Some(b) = self.peek_byte()? {
            if !is_inline_space(b) {
                break;
            }
            self.next_byte()?;
        }
        Ok(())
    }

    // A word ends at whitespace, which is left unread.
    fn read_word(&mut self, what: &str) -> FieldResult<String> {
        self.skip_inline_space()?;
        match self.peek_byte()? {
            None => return Err(FieldFault::Eof),
            Some(b'\n') => {
                return Err(FieldFault::Malformed(format!("missing {}", what)));
            }
            Some(_) => {}
        }

        // Every record ends in a newline, so a word cut off by EOF is a
        // partial write, never a complete word.
        let mut bytes = Vec::new();
        loop {
            match self.peek_byte()? {
                None => return Err(FieldFault::Eof),
                Some(b) if b.is_ascii_whitespace() => break,
                Some(b) => {
                    bytes.push(b);
                    self.next_byte()?;
                }
            }
        }
        into_text(bytes, what)
    }

    // The rest of the line, internal whitespace preserved, newline consumed.
    fn read_value_line(&mut self) -> FieldResult<String> {
        self.skip_inline_space()?;
        let mut bytes = Vec::new();
        loop {
            match self.next_byte()? {
                None => return Err(FieldFault::Eof),
                Some(b'\n') => break,
                Some(b) => bytes.push(b),
            }
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return Err(FieldFault::Malformed("empty attribute value".to_string()));
        }
        into_text(bytes, "attribute value")
    }

    fn expect_terminator(&mut self) -> FieldResult<()> {
        self.skip_inline_space()?;
        match self.next_byte()? {
            None => Err(FieldFault::Eof),
            Some(b'\n') => Ok(()),
            Some(b) => Err(FieldFault::Malformed(format!(
                "unexpected trailing data starting with {:?}",
                b as char
            ))),
        }
    }

    // --- recovery ---------------------------------------------------------

    fn contain_corruption(&mut self, offset: u64, reason: String) -> LogResult<()> {
        let mut closed = false;
        let mut line = Vec::new();

        // The rest of the corrupt line is never a marker.
        if !self.line_start {
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|e| LogError::read_failed(self.position, e))?;
            self.position += read as u64;
        }

        loop {
            line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|e| LogError::read_failed(self.position, e))?;
            if read == 0 {
                break;
            }
            self.position += read as u64;

            let first_word = line
                .split(|b| b.is_ascii_whitespace())
                .find(|w| !w.is_empty());
            if first_word == Some(b"106".as_slice()) && line.ends_with(b"\n") {
                closed = true;
                break;
            }
        }

        let boundary = self.position;
        Logger::warn(
            Event::CorruptRecord.as_str(),
            &[
                ("boundary", boundary.to_string().as_str()),
                ("closed_by_end_transaction", if closed { "true" } else { "false" }),
                ("log", self.path.display().to_string().as_str()),
                ("offset", offset.to_string().as_str()),
                ("reason", reason.as_str()),
            ],
        );

        self.corruption = Some(CorruptionReport {
            offset,
            reason,
            boundary,
            closed_by_end_transaction: closed,
        });
        Ok(())
    }
}

fn is_inline_space(b: u8) -> bool {
    b.is_ascii_whitespace() && b != b'\n'
}

fn into_text(bytes: Vec<u8>, what: &str) -> FieldResult<String> {
    String::from_utf8(bytes)
        .map_err(|_| FieldFault::Malformed(format!("{} is not valid UTF-8", what)))
}
