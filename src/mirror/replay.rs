//! Applying log records to a mirror
//!
//! Replay never fails. A record that refers to state the mirror does not
//! have is reported as a `Divergence` and otherwise skipped, so one bad
//! record cannot stop a rebuild.

use std::fmt;

use crate::joblog::{JobKey, LogOperation, LogRecord};

use super::classad::{is_private_attribute, ClassAd};
use super::collection::{InsertOutcome, JobQueueMirror, RemoveOutcome};

/// What was inconsistent about a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    /// The key could not be split into cluster and proc ids
    UnparseableKey,
    /// A record was created twice
    DuplicateRecord,
    /// Destroy, set or delete on a record that does not exist
    MissingRecord,
    /// A proc was created before its cluster
    MissingCluster,
}

impl DivergenceReason {
    /// Upper-case name used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceReason::UnparseableKey => "UNPARSEABLE_KEY",
            DivergenceReason::DuplicateRecord => "DUPLICATE_RECORD",
            DivergenceReason::MissingRecord => "MISSING_RECORD",
            DivergenceReason::MissingCluster => "MISSING_CLUSTER",
        }
    }
}

/// A reportable anomaly found while replaying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Offset of the offending record
    pub offset: u64,
    /// Raw key as written in the log
    pub key: String,
    pub reason: DivergenceReason,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for key '{}' at offset {}",
            self.reason.as_str(),
            self.key,
            self.offset
        )
    }
}

/// Applies one record to the mirror.
///
/// Transaction markers and the sequence marker have no effect here;
/// grouping is the caller's job.
pub fn apply_record(mirror: &mut JobQueueMirror, record: &LogRecord) -> Option<Divergence> {
    let raw_key = record.operation.key()?;
    let divergence = |reason| {
        Some(Divergence {
            offset: record.offset,
            key: raw_key.to_string(),
            reason,
        })
    };

    let key = match JobKey::parse(raw_key) {
        Some(key) => key,
        None => return divergence(DivergenceReason::UnparseableKey),
    };

    match &record.operation {
        LogOperation::NewClassAd {
            my_type,
            target_type,
            ..
        } => {
            let orphan = !key.is_cluster() && mirror.find_key(&key.owner()).is_none();
            match mirror.insert(key, ClassAd::new(my_type.as_str(), target_type.as_str())) {
                InsertOutcome::Duplicate => divergence(DivergenceReason::DuplicateRecord),
                InsertOutcome::Inserted if orphan => divergence(DivergenceReason::MissingCluster),
                InsertOutcome::Inserted => None,
            }
        }
        LogOperation::DestroyClassAd { .. } => match mirror.destroy(&key) {
            RemoveOutcome::Removed => None,
            RemoveOutcome::NotFound => divergence(DivergenceReason::MissingRecord),
        },
        LogOperation::SetAttribute { name, value, .. } => {
            if is_private_attribute(name) {
                return None;
            }
            match mirror.find_mut(&key) {
                Some(ad) => {
                    ad.assign(name.as_str(), value.as_str());
                    None
                }
                None => divergence(DivergenceReason::MissingRecord),
            }
        }
        LogOperation::DeleteAttribute { name, .. } => {
            if is_private_attribute(name) {
                return None;
            }
            match mirror.find_mut(&key) {
                Some(ad) => {
                    ad.delete(name);
                    None
                }
                None => divergence(DivergenceReason::MissingRecord),
            }
        }
        _ => None,
    }
}

/// Applies records in order and collects every divergence
pub fn apply_all<'a, I>(mirror: &mut JobQueueMirror, records: I) -> Vec<Divergence>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    records
        .into_iter()
        .filter_map(|record| apply_record(mirror, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ops: Vec<LogOperation>) -> Vec<LogRecord> {
        let mut offset = 0;
        ops.into_iter()
            .map(|op| {
                let len = op.encode().len() as u64;
                let record = LogRecord::new(offset, offset + len, op);
                offset += len;
                record
            })
            .collect()
    }

    fn new_ad(key: &str) -> LogOperation {
        LogOperation::NewClassAd {
            key: key.into(),
            my_type: "Job".into(),
            target_type: "Machine".into(),
        }
    }

    fn set(key: &str, name: &str, value: &str) -> LogOperation {
        LogOperation::SetAttribute {
            key: key.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_destroyed_cluster_lands_in_history() {
        let log = records(vec![
            new_ad("C1"),
            set("C1", "Owner", "alice"),
            LogOperation::DestroyClassAd { key: "C1".into() },
        ]);

        let mut mirror = JobQueueMirror::new();
        assert!(apply_all(&mut mirror, &log).is_empty());

        assert_eq!(mirror.cluster_count(), 0);
        assert_eq!(mirror.history_count(), 1);
        let archived = mirror.find_history("C1", None).unwrap();
        assert_eq!(archived.lookup("Owner"), Some("alice"));
    }

    #[test]
    fn test_private_attributes_never_stored() {
        let log = records(vec![
            new_ad("1.0"),
            set("1.0", "ClaimId", "\"secret\""),
            set("1.0", "JobStatus", "2"),
        ]);

        let mut mirror = JobQueueMirror::new();
        let divergences = apply_all(&mut mirror, &log);

        // 1.0 without cluster 1
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].reason, DivergenceReason::MissingCluster);

        let ad = mirror.find("1", Some("0")).unwrap();
        assert_eq!(ad.lookup("ClaimId"), None);
        assert_eq!(ad.lookup("JobStatus"), Some("2"));
    }

    #[test]
    fn test_anomalies_reported_and_replay_continues() {
        let log = records(vec![
            set("9.0", "Owner", "\"x\""),
            LogOperation::DeleteAttribute {
                key: "9.-1".into(),
                name: "Owner".into(),
            },
            LogOperation::DestroyClassAd { key: "9.2".into() },
            new_ad(".5"),
            new_ad("4"),
            new_ad("4.-1"),
            set("4", "Owner", "\"y\""),
        ]);

        let mut mirror = JobQueueMirror::new();
        let reasons: Vec<_> = apply_all(&mut mirror, &log)
            .into_iter()
            .map(|d| d.reason)
            .collect();

        assert_eq!(
            reasons,
            vec![
                DivergenceReason::MissingRecord,
                DivergenceReason::MissingRecord,
                DivergenceReason::MissingRecord,
                DivergenceReason::UnparseableKey,
                DivergenceReason::DuplicateRecord,
            ]
        );
        assert_eq!(mirror.find("4", None).unwrap().lookup("Owner"), Some("\"y\""));
    }

    #[test]
    fn test_markers_have_no_effect() {
        let log = records(vec![
            LogOperation::SequenceMarker {
                sequence_number: 1,
                creation_time: 0,
            },
            LogOperation::BeginTransaction,
            LogOperation::EndTransaction,
        ]);
        let mut mirror = JobQueueMirror::new();
        assert!(apply_all(&mut mirror, &log).is_empty());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_divergence_display() {
        let d = Divergence {
            offset: 12,
            key: "3.1".into(),
            reason: DivergenceReason::MissingRecord,
        };
        assert_eq!(d.to_string(), "MISSING_RECORD for key '3.1' at offset 12");
    }
}
