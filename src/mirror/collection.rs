//! In-memory job queue mirror
//!
//! Three disjoint partitions: live clusters, live procs, and history
//! (terminal snapshots). A proc is always addressed by its cluster id and
//! proc id together.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::joblog::JobKey;

use super::classad::ClassAd;
use super::table::{BucketTable, DEFAULT_BUCKET_COUNT};

/// Partition a mirror entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Live cluster records
    Cluster,
    /// Live proc records
    Proc,
    /// Terminal snapshots
    History,
}

impl Partition {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Cluster => "cluster",
            Partition::Proc => "proc",
            Partition::History => "history",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Key already present; nothing changed
    Duplicate,
}

/// Result of a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// One exported entry, borrowed from the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportEntry<'a> {
    pub partition: Partition,
    pub key: &'a JobKey,
    pub ad: &'a ClassAd,
}

impl ExportEntry<'_> {
    /// Clones the entry out of the mirror
    pub fn to_owned_parts(&self) -> (Partition, JobKey, ClassAd) {
        (self.partition, self.key.clone(), self.ad.clone())
    }
}

/// Indexed collection of live and historical queue records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQueueMirror {
    clusters: BucketTable<ClassAd>,
    procs: BucketTable<ClassAd>,
    history: BucketTable<ClassAd>,
}

impl Default for JobQueueMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueueMirror {
    /// Creates an empty mirror with the default bucket count
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKET_COUNT)
    }

    /// Creates an empty mirror with `bucket_count` buckets per partition
    pub fn with_buckets(bucket_count: usize) -> Self {
        Self {
            clusters: BucketTable::new(bucket_count),
            procs: BucketTable::new(bucket_count),
            history: BucketTable::new(bucket_count),
        }
    }

    /// Inserts a cluster record
    pub fn insert_container(&mut self, cluster_id: &str, ad: ClassAd) -> InsertOutcome {
        outcome(self.clusters.insert(JobKey::cluster(cluster_id), ad))
    }

    /// Inserts a proc record
    pub fn insert_member(&mut self, cluster_id: &str, proc_id: &str, ad: ClassAd) -> InsertOutcome {
        outcome(self.procs.insert(JobKey::proc(cluster_id, proc_id), ad))
    }

    /// Inserts a record by key into the matching live partition
    pub fn insert(&mut self, key: JobKey, ad: ClassAd) -> InsertOutcome {
        let table = self.live_table_mut(&key);
        outcome(table.insert(key, ad))
    }

    /// Inserts a terminal snapshot
    pub fn insert_history(
        &mut self,
        cluster_id: &str,
        proc_id: Option<&str>,
        ad: ClassAd,
    ) -> InsertOutcome {
        outcome(self.history.insert(key_for(cluster_id, proc_id), ad))
    }

    /// Stores a terminal snapshot, replacing any older one under `key`
    pub fn archive(&mut self, key: JobKey, ad: ClassAd) {
        self.history.remove(&key);
        self.history.insert(key, ad);
    }

    /// Looks up a live record; `proc_id = None` addresses the cluster
    pub fn find(&self, cluster_id: &str, proc_id: Option<&str>) -> Option<&ClassAd> {
        self.find_key(&key_for(cluster_id, proc_id))
    }

    /// Looks up a live record by key
    pub fn find_key(&self, key: &JobKey) -> Option<&ClassAd> {
        self.live_table(key).get(key)
    }

    /// Looks up a live record by key for modification
    pub fn find_mut(&mut self, key: &JobKey) -> Option<&mut ClassAd> {
        self.live_table_mut(key).get_mut(key)
    }

    /// Looks up a terminal snapshot
    pub fn find_history(&self, cluster_id: &str, proc_id: Option<&str>) -> Option<&ClassAd> {
        self.history.get(&key_for(cluster_id, proc_id))
    }

    /// Removes a cluster record without touching its procs
    pub fn remove_container(&mut self, cluster_id: &str) -> RemoveOutcome {
        removed(self.clusters.remove(&JobKey::cluster(cluster_id)).is_some())
    }

    /// Removes a proc record
    pub fn remove_member(&mut self, cluster_id: &str, proc_id: &str) -> RemoveOutcome {
        removed(self.procs.remove(&JobKey::proc(cluster_id, proc_id)).is_some())
    }

    /// Moves a proc into history.
    ///
    /// The snapshot is the proc layered over its cluster. An older snapshot
    /// under the same key is replaced.
    pub fn destroy_member(&mut self, cluster_id: &str, proc_id: &str) -> RemoveOutcome {
        let key = JobKey::proc(cluster_id, proc_id);
        let ad = match self.procs.remove(&key) {
            Some(ad) => ad,
            None => return RemoveOutcome::NotFound,
        };

        let snapshot = match self.clusters.get(&key.owner()) {
            Some(cluster) => ad.compose_over(cluster),
            None => ad,
        };
        self.archive(key, snapshot);
        RemoveOutcome::Removed
    }

    /// Moves a cluster into history. Procs are not cascaded.
    pub fn destroy_container(&mut self, cluster_id: &str) -> RemoveOutcome {
        let key = JobKey::cluster(cluster_id);
        match self.clusters.remove(&key) {
            Some(ad) => {
                self.archive(key, ad);
                RemoveOutcome::Removed
            }
            None => RemoveOutcome::NotFound,
        }
    }

    /// Destroys the record named by `key`
    pub fn destroy(&mut self, key: &JobKey) -> RemoveOutcome {
        match key {
            JobKey::Cluster(c) => self.destroy_container(c),
            JobKey::Proc(c, p) => self.destroy_member(c, p),
        }
    }

    /// Every entry: clusters, then procs, then history.
    ///
    /// The iterator is single-pass; call again for a fresh export.
    pub fn export_all(&self) -> impl Iterator<Item = ExportEntry<'_>> + '_ {
        tagged(Partition::Cluster, &self.clusters)
            .chain(tagged(Partition::Proc, &self.procs))
            .chain(tagged(Partition::History, &self.history))
    }

    /// Builds a mirror from exported entries.
    ///
    /// Entries whose key does not fit their partition are ignored.
    pub fn load<I>(bucket_count: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = (Partition, JobKey, ClassAd)>,
    {
        let mut mirror = Self::with_buckets(bucket_count);
        for (partition, key, ad) in entries {
            mirror.insert_entry(partition, key, ad);
        }
        mirror
    }

    /// Inserts into an explicit partition.
    ///
    /// A key that does not fit the partition (a proc key for the cluster
    /// partition or the reverse) is reported as `None`. History entries
    /// are archived, so they replace an older snapshot and never collide.
    pub fn insert_entry(
        &mut self,
        partition: Partition,
        key: JobKey,
        ad: ClassAd,
    ) -> Option<InsertOutcome> {
        let table = match partition {
            Partition::Cluster if key.is_cluster() => &mut self.clusters,
            Partition::Proc if !key.is_cluster() => &mut self.procs,
            Partition::History => {
                self.archive(key, ad);
                return Some(InsertOutcome::Inserted);
            }
            _ => return None,
        };
        Some(outcome(table.insert(key, ad)))
    }

    /// Empties the live partitions; history is kept
    pub fn clear_live(&mut self) {
        self.clusters.clear();
        self.procs.clear();
    }

    /// Live cluster count
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Live proc count
    pub fn proc_count(&self) -> usize {
        self.procs.len()
    }

    /// History count
    pub fn history_count(&self) -> usize {
        self.history.len()
    }

    /// Total entries across partitions
    pub fn len(&self) -> usize {
        self.cluster_count() + self.proc_count() + self.history_count()
    }

    /// True if every partition is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_table(&self, key: &JobKey) -> &BucketTable<ClassAd> {
        if key.is_cluster() {
            &self.clusters
        } else {
            &self.procs
        }
    }

    fn live_table_mut(&mut self, key: &JobKey) -> &mut BucketTable<ClassAd> {
        if key.is_cluster() {
            &mut self.clusters
        } else {
            &mut self.procs
        }
    }
}

fn tagged(
    partition: Partition,
    table: &BucketTable<ClassAd>,
) -> impl Iterator<Item = ExportEntry<'_>> + '_ {
    table
        .iter()
        .map(move |(key, ad)| ExportEntry { partition, key, ad })
}

fn key_for(cluster_id: &str, proc_id: Option<&str>) -> JobKey {
    match proc_id {
        Some(p) => JobKey::proc(cluster_id, p),
        None => JobKey::cluster(cluster_id),
    }
}

fn outcome(inserted: bool) -> InsertOutcome {
    if inserted {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::Duplicate
    }
}

fn removed(found: bool) -> RemoveOutcome {
    if found {
        RemoveOutcome::Removed
    } else {
        RemoveOutcome::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(owner: &str) -> ClassAd {
        let mut ad = ClassAd::new("Job", "Machine");
        ad.assign("Owner", format!("\"{}\"", owner));
        ad
    }

    #[test]
    fn test_insert_find_remove() {
        let mut mirror = JobQueueMirror::with_buckets(8);
        assert_eq!(mirror.insert_container("1", job("alice")), InsertOutcome::Inserted);
        assert_eq!(mirror.insert_container("1", job("bob")), InsertOutcome::Duplicate);
        assert_eq!(mirror.insert_member("1", "0", ClassAd::new("Job", "Machine")), InsertOutcome::Inserted);

        assert_eq!(mirror.find("1", None).unwrap().lookup("Owner"), Some("\"alice\""));
        assert!(mirror.find("1", Some("0")).is_some());
        assert!(mirror.find("0", None).is_none());

        assert_eq!(mirror.remove_member("1", "0"), RemoveOutcome::Removed);
        assert_eq!(mirror.remove_member("1", "0"), RemoveOutcome::NotFound);
        assert_eq!(mirror.remove_container("1"), RemoveOutcome::Removed);
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_proc_ids_scoped_by_cluster() {
        let mut mirror = JobQueueMirror::with_buckets(4);
        mirror.insert_member("1", "0", job("alice"));
        mirror.insert_member("2", "0", job("bob"));
        assert_eq!(mirror.find("2", Some("0")).unwrap().lookup("Owner"), Some("\"bob\""));
        assert_eq!(mirror.proc_count(), 2);
    }

    #[test]
    fn test_destroy_member_archives_composed_snapshot() {
        let mut mirror = JobQueueMirror::new();
        mirror.insert_container("5", job("alice"));
        let mut proc_ad = ClassAd::new("Job", "Machine");
        proc_ad.assign("ProcId", "0");
        mirror.insert_member("5", "0", proc_ad);

        assert_eq!(mirror.destroy_member("5", "0"), RemoveOutcome::Removed);
        assert_eq!(mirror.proc_count(), 0);
        assert_eq!(mirror.cluster_count(), 1);

        let snapshot = mirror.find_history("5", Some("0")).unwrap();
        assert_eq!(snapshot.lookup("Owner"), Some("\"alice\""));
        assert_eq!(snapshot.lookup("ProcId"), Some("0"));
    }

    #[test]
    fn test_destroy_container_does_not_cascade() {
        let mut mirror = JobQueueMirror::new();
        mirror.insert_container("5", job("alice"));
        mirror.insert_member("5", "0", ClassAd::new("Job", "Machine"));

        assert_eq!(mirror.destroy_container("5"), RemoveOutcome::Removed);
        assert_eq!(mirror.cluster_count(), 0);
        assert_eq!(mirror.proc_count(), 1);
        assert!(mirror.find_history("5", None).is_some());
        assert_eq!(mirror.destroy_container("5"), RemoveOutcome::NotFound);
    }

    #[test]
    fn test_history_keeps_latest_snapshot() {
        let mut mirror = JobQueueMirror::new();
        mirror.insert_container("7", job("alice"));
        mirror.destroy_container("7");
        mirror.insert_container("7", job("bob"));
        mirror.destroy_container("7");

        assert_eq!(mirror.history_count(), 1);
        let snapshot = mirror.find_history("7", None).unwrap();
        assert_eq!(snapshot.lookup("Owner"), Some("\"bob\""));

        // Loads follow the same rule; direct inserts still reject.
        assert_eq!(
            mirror.insert_entry(Partition::History, JobKey::cluster("7"), job("carol")),
            Some(InsertOutcome::Inserted)
        );
        assert_eq!(
            mirror.find_history("7", None).unwrap().lookup("Owner"),
            Some("\"carol\"")
        );
        assert_eq!(
            mirror.insert_history("7", None, job("dave")),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn test_export_then_load_is_identical() {
        let mut mirror = JobQueueMirror::with_buckets(3);
        mirror.insert_container("1", job("alice"));
        mirror.insert_member("1", "0", job("alice"));
        mirror.insert_member("1", "1", job("alice"));
        mirror.destroy_member("1", "1");

        let exported: Vec<_> = mirror.export_all().map(|e| e.to_owned_parts()).collect();
        assert_eq!(exported.len(), 3);
        assert_eq!(exported[0].0, Partition::Cluster);

        let copy = JobQueueMirror::load(17, exported);
        assert_eq!(copy, mirror);
    }

    #[test]
    fn test_clear_live_keeps_history() {
        let mut mirror = JobQueueMirror::new();
        mirror.insert_container("1", job("alice"));
        mirror.insert_container("2", job("bob"));
        mirror.destroy_container("2");

        mirror.clear_live();
        assert_eq!(mirror.cluster_count(), 0);
        assert_eq!(mirror.history_count(), 1);
    }

    #[test]
    fn test_load_ignores_misplaced_entries() {
        let entries = vec![(Partition::Cluster, JobKey::proc("1", "0"), ClassAd::default())];
        assert!(JobQueueMirror::load(4, entries).is_empty());
    }
}
