//! Replication error types
//!
//! - I/O, probe and sink failures abandon the current poll and are retried
//! - Invalid configuration and untrustworthy persisted state are fatal and
//!   require operator intervention

use std::fmt;

use crate::joblog::LogError;

use super::sink::SinkError;

/// Replication error type
#[derive(Debug, Clone)]
pub struct ReplicationError {
    /// Error kind
    pub kind: ReplicationErrorKind,
    /// Error message
    pub message: String,
}

/// Replication error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Log file could not be opened or read
    IoFailed,

    /// Change classification could not be determined
    ProbeFailed,

    /// Downstream sink rejected or failed a call
    SinkFailed,

    /// Configuration is invalid
    ConfigurationInvalid,

    /// Persisted cursor or probe state cannot be trusted
    StateInconsistent,
}

impl ReplicationErrorKind {
    /// Stable code used in log output
    pub fn code(&self) -> &'static str {
        match self {
            ReplicationErrorKind::IoFailed => "QM_REPL_IO_FAILED",
            ReplicationErrorKind::ProbeFailed => "QM_REPL_PROBE_FAILED",
            ReplicationErrorKind::SinkFailed => "QM_REPL_SINK_FAILED",
            ReplicationErrorKind::ConfigurationInvalid => "QM_REPL_CONFIG_INVALID",
            ReplicationErrorKind::StateInconsistent => "QM_REPL_STATE_INCONSISTENT",
        }
    }
}

impl ReplicationError {
    /// Create a new replication error.
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an I/O error.
    pub fn io_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::IoFailed, message)
    }

    /// Create a probe error.
    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ProbeFailed, message)
    }

    /// Create a sink error.
    pub fn sink_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::SinkFailed, message)
    }

    /// Create a configuration error.
    pub fn configuration_invalid(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConfigurationInvalid, message)
    }

    /// Create a persisted-state error.
    pub fn state_inconsistent(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::StateInconsistent, message)
    }

    /// Stable code of the error kind
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Check if this error is fatal (requires operator intervention).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::ConfigurationInvalid | ReplicationErrorKind::StateInconsistent
        )
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_fatal() { "FATAL" } else { "ERROR" };
        write!(f, "[{}] {}: {}", severity, self.code(), self.message)
    }
}

impl std::error::Error for ReplicationError {}

impl From<LogError> for ReplicationError {
    fn from(e: LogError) -> Self {
        // Reading before the start or past the end of the log means the
        // persisted cursor is wrong.
        if e.is_fatal() {
            Self::state_inconsistent(e.to_string())
        } else {
            Self::io_failed(e.to_string())
        }
    }
}

impl From<SinkError> for ReplicationError {
    fn from(e: SinkError) -> Self {
        Self::sink_failed(e.to_string())
    }
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_fatal_errors() {
        assert!(ReplicationError::configuration_invalid("test").is_fatal());
        assert!(ReplicationError::state_inconsistent("test").is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!ReplicationError::io_failed("test").is_fatal());
        assert!(!ReplicationError::probe_failed("test").is_fatal());
        assert!(!ReplicationError::sink_failed("test").is_fatal());
    }

    #[test]
    fn test_display_carries_code() {
        let err = ReplicationError::state_inconsistent("checksum mismatch");
        assert_eq!(
            err.to_string(),
            "[FATAL] QM_REPL_STATE_INCONSISTENT: checksum mismatch"
        );
    }

    #[test]
    fn test_log_error_mapping() {
        let out_of_range: ReplicationError = LogError::offset_out_of_range(500, 100).into();
        assert_eq!(out_of_range.kind, ReplicationErrorKind::StateInconsistent);

        let read: ReplicationError =
            LogError::read_failed(0, io::Error::new(io::ErrorKind::Other, "boom")).into();
        assert_eq!(read.kind, ReplicationErrorKind::IoFailed);
    }

    #[test]
    fn test_sink_error_mapping() {
        let err: ReplicationError = SinkError::Unavailable("down".into()).into();
        assert_eq!(err.kind, ReplicationErrorKind::SinkFailed);
        assert!(!err.is_fatal());
    }
}
