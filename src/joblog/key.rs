//! Job keys
//!
//! A log key names either a cluster (`17.-1`, or bare `17`) or a proc
//! within a cluster (`17.3`). The cluster and proc ids together form the
//! identity of a proc; a proc id is meaningless on its own.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between cluster and proc ids
pub const KEY_DELIMITER: char = '.';

/// Proc id that denotes the cluster itself
pub const CLUSTER_SENTINEL: &str = "-1";

/// Parsed identity of a queue record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobKey {
    /// A cluster record
    Cluster(String),
    /// A proc record inside a cluster: (cluster id, proc id)
    Proc(String, String),
}

impl JobKey {
    /// Parses a raw log key.
    ///
    /// Returns `None` when either side of the delimiter is empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let (cluster, proc_id) = match raw.split_once(KEY_DELIMITER) {
            Some((cluster, proc_id)) => (cluster, Some(proc_id)),
            None => (raw, None),
        };

        if cluster.is_empty() {
            return None;
        }
        let cluster = normalize_cluster_id(cluster);

        match proc_id {
            None => Some(JobKey::Cluster(cluster)),
            Some(p) if p.is_empty() => None,
            Some(p) if is_cluster_sentinel(p) => Some(JobKey::Cluster(cluster)),
            Some(p) => Some(JobKey::Proc(cluster, p.to_string())),
        }
    }

    /// Builds a cluster key
    pub fn cluster(cluster_id: impl Into<String>) -> Self {
        JobKey::Cluster(cluster_id.into())
    }

    /// Builds a proc key
    pub fn proc(cluster_id: impl Into<String>, proc_id: impl Into<String>) -> Self {
        JobKey::Proc(cluster_id.into(), proc_id.into())
    }

    /// Returns the owning cluster id
    pub fn cluster_id(&self) -> &str {
        match self {
            JobKey::Cluster(c) | JobKey::Proc(c, _) => c,
        }
    }

    /// Returns the proc id, `None` for cluster keys
    pub fn proc_id(&self) -> Option<&str> {
        match self {
            JobKey::Cluster(_) => None,
            JobKey::Proc(_, p) => Some(p),
        }
    }

    /// Returns true for cluster keys
    pub fn is_cluster(&self) -> bool {
        matches!(self, JobKey::Cluster(_))
    }

    /// Key of the cluster that owns this record
    pub fn owner(&self) -> JobKey {
        JobKey::Cluster(self.cluster_id().to_string())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Cluster(c) => write!(f, "{}{}{}", c, KEY_DELIMITER, CLUSTER_SENTINEL),
            JobKey::Proc(c, p) => write!(f, "{}{}{}", c, KEY_DELIMITER, p),
        }
    }
}

// Any proc id that reads as the integer -1 ("-1", "-01") is the sentinel.
fn is_cluster_sentinel(proc_id: &str) -> bool {
    proc_id == CLUSTER_SENTINEL || proc_id.parse::<i64>() == Ok(-1)
}

// Numeric cluster ids drop leading zeros; anything else is kept verbatim.
fn normalize_cluster_id(cluster: &str) -> String {
    match cluster.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => cluster.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_with_sentinel() {
        assert_eq!(JobKey::parse("17.-1"), Some(JobKey::cluster("17")));
    }

    #[test]
    fn test_parse_bare_key_is_cluster() {
        assert_eq!(JobKey::parse("C1"), Some(JobKey::cluster("C1")));
    }

    #[test]
    fn test_parse_proc() {
        let key = JobKey::parse("17.3").unwrap();
        assert_eq!(key, JobKey::proc("17", "3"));
        assert_eq!(key.cluster_id(), "17");
        assert_eq!(key.proc_id(), Some("3"));
        assert_eq!(key.owner(), JobKey::cluster("17"));
    }

    #[test]
    fn test_leading_zeros_stripped_from_cluster() {
        assert_eq!(JobKey::parse("0042.0"), Some(JobKey::proc("42", "0")));
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert_eq!(JobKey::parse(""), None);
        assert_eq!(JobKey::parse(".3"), None);
        assert_eq!(JobKey::parse("17."), None);
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(JobKey::cluster("17").to_string(), "17.-1");
        assert_eq!(JobKey::proc("17", "3").to_string(), "17.3");
        assert_eq!(
            JobKey::parse(&JobKey::proc("17", "3").to_string()),
            Some(JobKey::proc("17", "3"))
        );
    }
}
