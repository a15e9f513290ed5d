//! Job queue log error types
//!
//! Error codes:
//! - QM_LOG_OPEN_FAILED (ERROR severity)
//! - QM_LOG_READ_FAILED (ERROR severity)
//! - QM_LOG_OFFSET_OUT_OF_RANGE (FATAL severity)
//!
//! Corrupt records are not errors: the parser recovers from them in place
//! and reports them through `CorruptionReport`.

use std::fmt;
use std::io;

/// Severity levels for log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The current poll fails, the next poll retries
    Error,
    /// Operator intervention required
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Log-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Log file could not be opened or stat'ed
    QmLogOpenFailed,
    /// Read or seek on an open log failed
    QmLogReadFailed,
    /// Requested position lies outside the log
    QmLogOffsetOutOfRange,
}

impl LogErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::QmLogOpenFailed => "QM_LOG_OPEN_FAILED",
            LogErrorCode::QmLogReadFailed => "QM_LOG_READ_FAILED",
            LogErrorCode::QmLogOffsetOutOfRange => "QM_LOG_OFFSET_OUT_OF_RANGE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::QmLogOpenFailed => Severity::Error,
            LogErrorCode::QmLogReadFailed => Severity::Error,
            LogErrorCode::QmLogOffsetOutOfRange => Severity::Fatal,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Job queue log error with context
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    /// Create an open failure
    pub fn open_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::QmLogOpenFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a read failure at a byte offset
    pub fn read_failed(offset: u64, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::QmLogReadFailed,
            message: format!("read failed: {}", source),
            details: Some(format!("byte_offset: {}", offset)),
            source: Some(source),
        }
    }

    /// Create an out-of-range seek error
    pub fn offset_out_of_range(offset: u64, file_size: u64) -> Self {
        Self {
            code: LogErrorCode::QmLogOffsetOutOfRange,
            message: format!(
                "offset {} lies beyond the end of the log ({} bytes)",
                offset, file_size
            ),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error requires operator intervention
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;
