//! Job queue log records
//!
//! Each record is a line of text that starts with a decimal op code:
//!
//! | Code | Fields |
//! |------|--------|
//! | 101  | key, my type, target type |
//! | 102  | key |
//! | 103  | key, name, value (rest of line) |
//! | 104  | key, name |
//! | 105  | (none) |
//! | 106  | (none) |
//! | 107  | sequence number, `CreationTimestamp`, unix seconds |
//!
//! A record only carries the fields of its own operation. Its location in
//! the file (`offset`, `next_offset`) is the only addressing mechanism the
//! log has.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label written between the sequence number and creation time of a marker
pub const CREATION_TIMESTAMP_LABEL: &str = "CreationTimestamp";

/// Operation codes as they appear in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum OpCode {
    /// A new cluster or proc record
    NewClassAd = 101,
    /// Removal of a record
    DestroyClassAd = 102,
    /// Attribute assignment
    SetAttribute = 103,
    /// Attribute removal
    DeleteAttribute = 104,
    /// Opens a transaction
    BeginTransaction = 105,
    /// Closes a transaction
    EndTransaction = 106,
    /// Generation marker at offset 0
    HistoricalSequenceNumber = 107,
}

impl OpCode {
    /// Convert from the numeric code, `None` for unknown values
    pub fn from_code(value: i64) -> Option<Self> {
        match value {
            101 => Some(OpCode::NewClassAd),
            102 => Some(OpCode::DestroyClassAd),
            103 => Some(OpCode::SetAttribute),
            104 => Some(OpCode::DeleteAttribute),
            105 => Some(OpCode::BeginTransaction),
            106 => Some(OpCode::EndTransaction),
            107 => Some(OpCode::HistoricalSequenceNumber),
            _ => None,
        }
    }

    /// Numeric code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Upper-case name used in log output
    pub fn name(self) -> &'static str {
        match self {
            OpCode::NewClassAd => "NEW_CLASSAD",
            OpCode::DestroyClassAd => "DESTROY_CLASSAD",
            OpCode::SetAttribute => "SET_ATTRIBUTE",
            OpCode::DeleteAttribute => "DELETE_ATTRIBUTE",
            OpCode::BeginTransaction => "BEGIN_TRANSACTION",
            OpCode::EndTransaction => "END_TRANSACTION",
            OpCode::HistoricalSequenceNumber => "SEQUENCE_MARKER",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The decoded body of a log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogOperation {
    /// `101 key mytype targettype`
    NewClassAd {
        key: String,
        my_type: String,
        target_type: String,
    },
    /// `102 key`
    DestroyClassAd { key: String },
    /// `103 key name value...`
    SetAttribute {
        key: String,
        name: String,
        value: String,
    },
    /// `104 key name`
    DeleteAttribute { key: String, name: String },
    /// `105`
    BeginTransaction,
    /// `106`
    EndTransaction,
    /// `107 seq CreationTimestamp time`
    SequenceMarker {
        sequence_number: u64,
        creation_time: i64,
    },
}

impl LogOperation {
    /// Op code of this operation
    pub fn op_code(&self) -> OpCode {
        match self {
            LogOperation::NewClassAd { .. } => OpCode::NewClassAd,
            LogOperation::DestroyClassAd { .. } => OpCode::DestroyClassAd,
            LogOperation::SetAttribute { .. } => OpCode::SetAttribute,
            LogOperation::DeleteAttribute { .. } => OpCode::DeleteAttribute,
            LogOperation::BeginTransaction => OpCode::BeginTransaction,
            LogOperation::EndTransaction => OpCode::EndTransaction,
            LogOperation::SequenceMarker { .. } => OpCode::HistoricalSequenceNumber,
        }
    }

    /// Raw key of the record the operation targets, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            LogOperation::NewClassAd { key, .. }
            | LogOperation::DestroyClassAd { key }
            | LogOperation::SetAttribute { key, .. }
            | LogOperation::DeleteAttribute { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Encodes the operation as one newline-terminated log line.
    pub fn encode(&self) -> String {
        let code = self.op_code();
        match self {
            LogOperation::NewClassAd {
                key,
                my_type,
                target_type,
            } => format!("{} {} {} {}\n", code, key, my_type, target_type),
            LogOperation::DestroyClassAd { key } => format!("{} {}\n", code, key),
            LogOperation::SetAttribute { key, name, value } => {
                format!("{} {} {} {}\n", code, key, name, value)
            }
            LogOperation::DeleteAttribute { key, name } => {
                format!("{} {} {}\n", code, key, name)
            }
            LogOperation::BeginTransaction | LogOperation::EndTransaction => {
                format!("{}\n", code)
            }
            LogOperation::SequenceMarker {
                sequence_number,
                creation_time,
            } => format!(
                "{} {} {} {}\n",
                code, sequence_number, CREATION_TIMESTAMP_LABEL, creation_time
            ),
        }
    }

    /// True for the two transaction delimiters
    pub fn is_transaction_marker(&self) -> bool {
        matches!(
            self,
            LogOperation::BeginTransaction | LogOperation::EndTransaction
        )
    }
}

/// A record read from the log, with its byte range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position where the record begins
    pub offset: u64,
    /// Position where the following record begins
    pub next_offset: u64,
    /// Decoded body
    pub operation: LogOperation,
}

impl LogRecord {
    /// Creates a record
    pub fn new(offset: u64, next_offset: u64, operation: LogOperation) -> Self {
        Self {
            offset,
            next_offset,
            operation,
        }
    }

    /// Op code of the record
    pub fn op_code(&self) -> OpCode {
        self.operation.op_code()
    }

    /// Length of the record in bytes
    pub fn len(&self) -> u64 {
        self.next_offset - self.offset
    }

    /// True if the record occupies no bytes (never the case for parsed records)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_code_roundtrip() {
        for code in 101..=107 {
            let op = OpCode::from_code(code).unwrap();
            assert_eq!(op.code() as i64, code);
        }
        assert!(OpCode::from_code(100).is_none());
        assert!(OpCode::from_code(108).is_none());
    }

    #[test]
    fn test_encode_matches_log_grammar() {
        let new_ad = LogOperation::NewClassAd {
            key: "C1".into(),
            my_type: "Job".into(),
            target_type: "Machine".into(),
        };
        assert_eq!(new_ad.encode(), "101 C1 Job Machine\n");

        let set = LogOperation::SetAttribute {
            key: "1.0".into(),
            name: "Cmd".into(),
            value: "\"/bin/echo hello world\"".into(),
        };
        assert_eq!(set.encode(), "103 1.0 Cmd \"/bin/echo hello world\"\n");

        assert_eq!(LogOperation::EndTransaction.encode(), "106\n");

        let marker = LogOperation::SequenceMarker {
            sequence_number: 5,
            creation_time: 1700000000,
        };
        assert_eq!(marker.encode(), "107 5 CreationTimestamp 1700000000\n");
    }

    #[test]
    fn test_key_only_for_record_operations() {
        let destroy = LogOperation::DestroyClassAd { key: "2.1".into() };
        assert_eq!(destroy.key(), Some("2.1"));
        assert_eq!(LogOperation::BeginTransaction.key(), None);
    }

    #[test]
    fn test_operation_serde_tagged() {
        let op = LogOperation::DeleteAttribute {
            key: "3.0".into(),
            name: "Owner".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"delete_attribute\""));
        let back: LogOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
