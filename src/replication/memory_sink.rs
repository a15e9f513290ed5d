//! In-memory reference sink
//!
//! Holds the replicated queue in a `JobQueueMirror`. A transaction works on
//! a staged copy that replaces the committed contents on `commit`, so
//! readers never observe a half-applied batch.

use crate::mirror::{
    ClassAd, InsertOutcome, JobQueueMirror, Partition, RemoveOutcome, DEFAULT_BUCKET_COUNT,
};

use super::cursor::StateRow;
use super::mutation::SinkMutation;
use super::sink::{
    ExecOutcome, QueryAnswer, ReplicationSink, SinkError, SinkQuery, SinkResult,
};

#[derive(Debug, Clone)]
struct Staged {
    contents: JobQueueMirror,
    state: Option<StateRow>,
    mutations: u64,
}

/// Transactional in-memory store
#[derive(Debug)]
pub struct MemorySink {
    contents: JobQueueMirror,
    state: Option<StateRow>,
    staged: Option<Staged>,
    committed_mutations: u64,
    commits: u64,
    fail_after: Option<u64>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Creates an empty sink
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKET_COUNT)
    }

    /// Creates an empty sink with `bucket_count` buckets per partition
    pub fn with_buckets(bucket_count: usize) -> Self {
        Self {
            contents: JobQueueMirror::with_buckets(bucket_count),
            state: None,
            staged: None,
            committed_mutations: 0,
            commits: 0,
            fail_after: None,
        }
    }

    /// Committed contents
    pub fn contents(&self) -> &JobQueueMirror {
        &self.contents
    }

    /// Mutations that reached committed contents
    pub fn committed_mutations(&self) -> u64 {
        self.committed_mutations
    }

    /// Number of successful commits
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// True while a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    /// Lets `executes` more calls to `execute` succeed, then fails one with `Unavailable`
    pub fn fail_after(&mut self, executes: u64) {
        self.fail_after = Some(executes);
    }

    /// Replaces the committed state row, bypassing transactions
    pub fn overwrite_state(&mut self, row: Option<StateRow>) {
        self.state = row;
    }

    fn staged_mut(&mut self) -> SinkResult<&mut Staged> {
        self.staged.as_mut().ok_or(SinkError::NoTransaction)
    }

    fn check_injected_failure(&mut self) -> SinkResult<()> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(SinkError::Unavailable("injected failure".to_string()))
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ReplicationSink for MemorySink {
    fn begin(&mut self) -> SinkResult<()> {
        if self.staged.is_some() {
            return Err(SinkError::TransactionOpen);
        }
        self.staged = Some(Staged {
            contents: self.contents.clone(),
            state: self.state.clone(),
            mutations: 0,
        });
        Ok(())
    }

    fn commit(&mut self) -> SinkResult<()> {
        let staged = self.staged.take().ok_or(SinkError::NoTransaction)?;
        self.contents = staged.contents;
        self.state = staged.state;
        self.committed_mutations += staged.mutations;
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> SinkResult<()> {
        self.staged.take().map(|_| ()).ok_or(SinkError::NoTransaction)
    }

    fn execute(&mut self, mutation: &SinkMutation) -> SinkResult<ExecOutcome> {
        if self.staged.is_none() {
            return Err(SinkError::NoTransaction);
        }
        self.check_injected_failure()?;

        let staged = self.staged_mut()?;
        let contents = &mut staged.contents;
        let outcome = match mutation {
            SinkMutation::Truncate => {
                contents.clear_live();
                ExecOutcome::Applied
            }
            SinkMutation::Load { partition, key, ad } => {
                match contents.insert_entry(*partition, key.clone(), ad.clone()) {
                    Some(InsertOutcome::Inserted) => ExecOutcome::Applied,
                    Some(InsertOutcome::Duplicate) => ExecOutcome::Duplicate,
                    None => {
                        return Err(SinkError::Rejected(format!(
                            "key {} does not belong in the {} partition",
                            key, partition
                        )))
                    }
                }
            }
            SinkMutation::CreateAd {
                key,
                my_type,
                target_type,
            } => {
                let ad = ClassAd::new(my_type.as_str(), target_type.as_str());
                match contents.insert(key.clone(), ad) {
                    InsertOutcome::Inserted => ExecOutcome::Applied,
                    InsertOutcome::Duplicate => ExecOutcome::Duplicate,
                }
            }
            SinkMutation::DestroyAd { key } => match contents.destroy(key) {
                RemoveOutcome::Removed => ExecOutcome::Applied,
                RemoveOutcome::NotFound => ExecOutcome::MissingTarget,
            },
            SinkMutation::SetAttribute {
                key, name, value, ..
            } => match contents.find_mut(key) {
                Some(ad) => {
                    ad.assign(name.as_str(), value.as_str());
                    ExecOutcome::Applied
                }
                None => ExecOutcome::MissingTarget,
            },
            SinkMutation::DeleteAttribute { key, name } => match contents.find_mut(key) {
                Some(ad) => {
                    ad.delete(name);
                    ExecOutcome::Applied
                }
                None => ExecOutcome::MissingTarget,
            },
        };

        if outcome == ExecOutcome::Applied {
            staged.mutations += 1;
        }
        Ok(outcome)
    }

    fn query(&self, query: &SinkQuery) -> SinkResult<QueryAnswer> {
        let answer = match query {
            SinkQuery::Lookup { partition, key } => {
                let found = match partition {
                    Partition::History => {
                        self.contents.find_history(key.cluster_id(), key.proc_id())
                    }
                    Partition::Cluster if key.is_cluster() => self.contents.find_key(key),
                    Partition::Proc if !key.is_cluster() => self.contents.find_key(key),
                    _ => None,
                };
                QueryAnswer::Record(found.cloned())
            }
            SinkQuery::Count { partition } => QueryAnswer::Count(match partition {
                Partition::Cluster => self.contents.cluster_count(),
                Partition::Proc => self.contents.proc_count(),
                Partition::History => self.contents.history_count(),
            }),
        };
        Ok(answer)
    }

    fn load_state(&self) -> SinkResult<Option<StateRow>> {
        Ok(self.state.clone())
    }

    fn store_state(&mut self, row: &StateRow) -> SinkResult<()> {
        self.staged_mut()?.state = Some(row.clone());
        Ok(())
    }
}
