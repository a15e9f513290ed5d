//! Mirror replay tests
//!
//! Replays parsed logs into a `JobQueueMirror` and checks the resulting
//! partitions.

use queuemirror::joblog::{LogParser, LogRecord, ReadOutcome};
use queuemirror::mirror::{apply_all, DivergenceReason, JobQueueMirror};
use std::fs;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn parse(contents: &str) -> Vec<LogRecord> {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("job_queue.log");
    fs::write(&path, contents).unwrap();

    let mut parser = LogParser::open(&path).unwrap();
    let mut records = Vec::new();
    while let ReadOutcome::Record(record) = parser.read_next().unwrap() {
        records.push(record);
    }
    records
}

fn replay(contents: &str) -> JobQueueMirror {
    let mut mirror = JobQueueMirror::new();
    let anomalies = apply_all(&mut mirror, &parse(contents));
    assert!(anomalies.is_empty(), "unexpected anomalies: {:?}", anomalies);
    mirror
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_destroyed_container_moves_to_history() {
    let mirror = replay("101 C1 Job Machine\n103 C1 Owner alice\n102 C1\n");

    assert_eq!(mirror.cluster_count(), 0);
    assert_eq!(mirror.history_count(), 1);
    let archived = mirror.find_history("C1", None).unwrap();
    assert_eq!(archived.lookup("Owner"), Some("alice"));
}

#[test]
fn test_destroyed_member_inherits_container_attributes() {
    let mirror = replay(
        "101 4.-1 Job Machine\n\
         103 4.-1 Owner \"dave\"\n\
         101 4.0 Job Machine\n\
         103 4.0 JobStatus 4\n\
         102 4.0\n",
    );

    assert_eq!(mirror.proc_count(), 0);
    assert_eq!(mirror.cluster_count(), 1);
    let archived = mirror.find_history("4", Some("0")).unwrap();
    assert_eq!(archived.lookup("JobStatus"), Some("4"));
    assert_eq!(archived.lookup("Owner"), Some("\"dave\""));
}

#[test]
fn test_private_attributes_are_not_mirrored() {
    let mirror = replay("101 2.-1 Job Machine\n103 2.-1 ClaimId \"secret\"\n103 2.-1 Cmd /bin/true\n");

    let ad = mirror.find("2", None).unwrap();
    assert_eq!(ad.lookup("ClaimId"), None);
    assert_eq!(ad.lookup("Cmd"), Some("/bin/true"));
}

#[test]
fn test_delete_attribute() {
    let mirror = replay("101 3.-1 Job Machine\n103 3.-1 Hold 1\n104 3.-1 Hold\n");
    assert_eq!(mirror.find("3", None).unwrap().lookup("Hold"), None);
}

// =============================================================================
// Divergence
// =============================================================================

#[test]
fn test_divergences_are_reported_not_fatal() {
    let mut mirror = JobQueueMirror::new();
    let anomalies = apply_all(
        &mut mirror,
        &parse(
            "101 1.-1 Job Machine\n\
             101 1.-1 Job Machine\n\
             103 9.-1 Owner x\n\
             101 5.0 Job Machine\n\
             102 8.-1\n",
        ),
    );

    let reasons: Vec<_> = anomalies.iter().map(|d| d.reason).collect();
    assert_eq!(
        reasons,
        vec![
            DivergenceReason::DuplicateRecord,
            DivergenceReason::MissingRecord,
            DivergenceReason::MissingCluster,
            DivergenceReason::MissingRecord,
        ]
    );
    // The orphan member is kept.
    assert!(mirror.find("5", Some("0")).is_some());
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_and_load_preserve_every_partition() {
    let mirror = replay(
        "101 1.-1 Job Machine\n\
         101 1.0 Job Machine\n\
         101 1.1 Job Machine\n\
         103 1.1 JobStatus 2\n\
         102 1.0\n",
    );

    let entries: Vec<_> = mirror.export_all().map(|e| e.to_owned_parts()).collect();
    assert_eq!(entries.len(), 3);

    let loaded = JobQueueMirror::load(17, entries);
    assert_eq!(loaded, mirror);
}
