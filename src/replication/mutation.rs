//! Sink mutations
//!
//! Consumers never see log records. A rebuild hands the sink `Truncate`
//! followed by one `Load` per exported mirror entry; an incremental batch
//! hands it one translated mutation per record.

use serde::{Deserialize, Serialize};

use crate::joblog::{JobKey, LogOperation, LogRecord};
use crate::mirror::{
    is_private_attribute, ClassAd, Divergence, DivergenceReason, ExportEntry, Partition,
    ValueKind,
};

/// One change to the downstream store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum SinkMutation {
    /// Remove every live cluster and proc; history is kept
    Truncate,
    /// Bulk-load one exported entry
    Load {
        partition: Partition,
        key: JobKey,
        ad: ClassAd,
    },
    /// Create an empty record
    CreateAd {
        key: JobKey,
        my_type: String,
        target_type: String,
    },
    /// Move a record to history
    DestroyAd { key: JobKey },
    /// Assign an attribute
    SetAttribute {
        key: JobKey,
        name: String,
        value: String,
        kind: ValueKind,
    },
    /// Remove an attribute
    DeleteAttribute { key: JobKey, name: String },
}

impl SinkMutation {
    /// Load mutation for an exported mirror entry
    pub fn load(entry: &ExportEntry<'_>) -> Self {
        SinkMutation::Load {
            partition: entry.partition,
            key: entry.key.clone(),
            ad: entry.ad.clone(),
        }
    }

    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            SinkMutation::Truncate => "truncate",
            SinkMutation::Load { .. } => "load",
            SinkMutation::CreateAd { .. } => "create_ad",
            SinkMutation::DestroyAd { .. } => "destroy_ad",
            SinkMutation::SetAttribute { .. } => "set_attribute",
            SinkMutation::DeleteAttribute { .. } => "delete_attribute",
        }
    }

    /// Key the mutation targets, if any
    pub fn key(&self) -> Option<&JobKey> {
        match self {
            SinkMutation::Truncate => None,
            SinkMutation::Load { key, .. }
            | SinkMutation::CreateAd { key, .. }
            | SinkMutation::DestroyAd { key }
            | SinkMutation::SetAttribute { key, .. }
            | SinkMutation::DeleteAttribute { key, .. } => Some(key),
        }
    }
}

/// Translates a record into the mutation it implies.
///
/// Transaction markers, the sequence marker and private attributes produce
/// no mutation. An unparseable key is a divergence.
pub fn translate(record: &LogRecord) -> Result<Option<SinkMutation>, Divergence> {
    let raw_key = match record.operation.key() {
        Some(raw_key) => raw_key,
        None => return Ok(None),
    };
    let key = JobKey::parse(raw_key).ok_or_else(|| Divergence {
        offset: record.offset,
        key: raw_key.to_string(),
        reason: DivergenceReason::UnparseableKey,
    })?;

    let mutation = match &record.operation {
        LogOperation::NewClassAd {
            my_type,
            target_type,
            ..
        } => SinkMutation::CreateAd {
            key,
            my_type: my_type.clone(),
            target_type: target_type.clone(),
        },
        LogOperation::DestroyClassAd { .. } => SinkMutation::DestroyAd { key },
        LogOperation::SetAttribute { name, value, .. } => {
            if is_private_attribute(name) {
                return Ok(None);
            }
            SinkMutation::SetAttribute {
                key,
                name: name.clone(),
                value: value.clone(),
                kind: ValueKind::classify(value),
            }
        }
        LogOperation::DeleteAttribute { name, .. } => {
            if is_private_attribute(name) {
                return Ok(None);
            }
            SinkMutation::DeleteAttribute {
                key,
                name: name.clone(),
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(mutation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(offset: u64, operation: LogOperation) -> LogRecord {
        let len = operation.encode().len() as u64;
        LogRecord::new(offset, offset + len, operation)
    }

    #[test]
    fn test_translate_set_classifies_value() {
        let numeric = translate(&at(
            0,
            LogOperation::SetAttribute {
                key: "3.0".into(),
                name: "JobStatus".into(),
                value: "2".into(),
            },
        ))
        .unwrap()
        .unwrap();
        assert_eq!(
            numeric,
            SinkMutation::SetAttribute {
                key: JobKey::proc("3", "0"),
                name: "JobStatus".into(),
                value: "2".into(),
                kind: ValueKind::Number,
            }
        );

        let text = translate(&at(
            0,
            LogOperation::SetAttribute {
                key: "3.-1".into(),
                name: "Owner".into(),
                value: "\"alice\"".into(),
            },
        ))
        .unwrap()
        .unwrap();
        assert!(matches!(
            text,
            SinkMutation::SetAttribute {
                kind: ValueKind::Text,
                ..
            }
        ));
        assert_eq!(text.key(), Some(&JobKey::cluster("3")));
    }

    #[test]
    fn test_markers_and_private_attributes_skipped() {
        assert_eq!(translate(&at(0, LogOperation::BeginTransaction)).unwrap(), None);
        assert_eq!(translate(&at(0, LogOperation::EndTransaction)).unwrap(), None);
        let private = at(
            0,
            LogOperation::SetAttribute {
                key: "1.0".into(),
                name: "ClaimId".into(),
                value: "\"<secret>\"".into(),
            },
        );
        assert_eq!(translate(&private).unwrap(), None);
    }

    #[test]
    fn test_unparseable_key_is_divergence() {
        let err = translate(&at(33, LogOperation::DestroyClassAd { key: "1.".into() })).unwrap_err();
        assert_eq!(err.offset, 33);
        assert_eq!(err.reason, DivergenceReason::UnparseableKey);
    }

    #[test]
    fn test_mutation_serde_tagged() {
        let m = SinkMutation::DestroyAd {
            key: JobKey::proc("1", "0"),
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"mutation\":\"destroy_ad\""));
        assert_eq!(m.name(), "destroy_ad");
    }
}
