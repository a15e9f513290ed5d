//! Replication counters
//!
//! Counters are monotonic for the life of the process; the two
//! `last_batch_*` values are overwritten after every replay batch.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters describing replicator activity
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    polls: AtomicU64,
    polls_skipped: AtomicU64,
    poll_failures: AtomicU64,
    rebuilds: AtomicU64,
    incremental_batches: AtomicU64,
    generations_drained: AtomicU64,
    generations_skipped: AtomicU64,
    records_applied: AtomicU64,
    mutations_executed: AtomicU64,
    anomalies: AtomicU64,
    corruptions_recovered: AtomicU64,
    transactions_discarded: AtomicU64,
    last_batch_records: AtomicU64,
    last_batch_millis: AtomicU64,
}

impl ReplicationMetrics {
    /// Create a registry with every counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A poll started
    pub fn increment_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// A poll was skipped without probing
    pub fn increment_polls_skipped(&self) {
        self.polls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A poll failed
    pub fn increment_poll_failures(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A full rebuild committed
    pub fn increment_rebuilds(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    /// An incremental batch completed
    pub fn increment_incremental_batches(&self) {
        self.incremental_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// A predecessor generation was replayed
    pub fn increment_generations_drained(&self) {
        self.generations_drained.fetch_add(1, Ordering::Relaxed);
    }

    /// A predecessor generation could not be replayed
    pub fn increment_generations_skipped(&self) {
        self.generations_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records applied to the mirror or sink
    pub fn add_records_applied(&self, count: u64) {
        self.records_applied.fetch_add(count, Ordering::Relaxed);
    }

    /// Mutations executed against the sink
    pub fn add_mutations_executed(&self, count: u64) {
        self.mutations_executed.fetch_add(count, Ordering::Relaxed);
    }

    /// Divergence anomalies observed
    pub fn add_anomalies(&self, count: u64) {
        self.anomalies.fetch_add(count, Ordering::Relaxed);
    }

    /// A corrupt record was contained
    pub fn increment_corruptions(&self) {
        self.corruptions_recovered.fetch_add(1, Ordering::Relaxed);
    }

    /// An unclosed transaction was dropped
    pub fn increment_transactions_discarded(&self) {
        self.transactions_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the size and duration of the batch that just finished
    pub fn record_batch(&self, records: u64, millis: u64) {
        self.last_batch_records.store(records, Ordering::Relaxed);
        self.last_batch_millis.store(millis, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            polls_skipped: self.polls_skipped.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            incremental_batches: self.incremental_batches.load(Ordering::Relaxed),
            generations_drained: self.generations_drained.load(Ordering::Relaxed),
            generations_skipped: self.generations_skipped.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            mutations_executed: self.mutations_executed.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            corruptions_recovered: self.corruptions_recovered.load(Ordering::Relaxed),
            transactions_discarded: self.transactions_discarded.load(Ordering::Relaxed),
            last_batch_records: self.last_batch_records.load(Ordering::Relaxed),
            last_batch_millis: self.last_batch_millis.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of `ReplicationMetrics`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub polls_skipped: u64,
    pub poll_failures: u64,
    pub rebuilds: u64,
    pub incremental_batches: u64,
    pub generations_drained: u64,
    pub generations_skipped: u64,
    pub records_applied: u64,
    pub mutations_executed: u64,
    pub anomalies: u64,
    pub corruptions_recovered: u64,
    pub transactions_discarded: u64,
    pub last_batch_records: u64,
    pub last_batch_millis: u64,
}

impl MetricsSnapshot {
    /// Serializes the snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = ReplicationMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = ReplicationMetrics::new();
        metrics.increment_polls();
        metrics.increment_polls();
        metrics.add_records_applied(7);
        metrics.add_records_applied(3);
        metrics.increment_corruptions();

        let snap = metrics.snapshot();
        assert_eq!(snap.polls, 2);
        assert_eq!(snap.records_applied, 10);
        assert_eq!(snap.corruptions_recovered, 1);
    }

    #[test]
    fn test_batch_values_overwrite() {
        let metrics = ReplicationMetrics::new();
        metrics.record_batch(100, 40);
        metrics.record_batch(5, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.last_batch_records, 5);
        assert_eq!(snap.last_batch_millis, 2);
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = ReplicationMetrics::new();
        metrics.increment_rebuilds();
        let parsed: serde_json::Value = serde_json::from_str(&metrics.snapshot().to_json()).unwrap();
        assert_eq!(parsed["rebuilds"], 1);
    }
}
