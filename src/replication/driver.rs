//! Periodic driver
//!
//! Polls once per configured interval until shutdown is signalled or a
//! poll fails fatally. Polls do blocking file and sink I/O, so each runs
//! on the blocking pool; the replicator is moved in and handed back.

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::observability::{Event, Logger};

use super::errors::{ReplicationError, ReplicationResult};
use super::orchestrator::Replicator;
use super::sink::ReplicationSink;

/// Runs `replicator` until `shutdown` becomes true or is dropped.
///
/// Returns the replicator on clean shutdown and the error on a fatal poll.
/// Non-fatal poll failures are logged and retried next interval.
pub async fn run<S>(
    replicator: Replicator<S>,
    mut shutdown: watch::Receiver<bool>,
) -> ReplicationResult<Replicator<S>>
where
    S: ReplicationSink + 'static,
{
    let mut ticker = tokio::time::interval(replicator.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut replicator = replicator;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let mut replicator = replicator;
                    let result = replicator.poll();
                    (replicator, result)
                })
                .await
                .map_err(|e| ReplicationError::state_inconsistent(format!("poll task failed: {}", e)))?;

                replicator = returned;
                if let Err(e) = result {
                    if e.is_fatal() {
                        Logger::fatal(
                            Event::ReplicatorStop.as_str(),
                            &[("code", e.code()), ("reason", "fatal poll")],
                        );
                        return Err(e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    Logger::info(Event::ReplicatorStop.as_str(), &[("reason", "shutdown")]);
    Ok(replicator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::config::ReplicatorConfig;
    use crate::replication::cursor::StateRow;
    use crate::replication::memory_sink::MemorySink;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("job_queue.log");
        fs::write(&log, "107 1 CreationTimestamp 10\n101 1.-1 Job Machine\n").unwrap();

        let mut config = ReplicatorConfig::new(&log);
        config.poll_interval_secs = 1;
        let replicator = Replicator::new(config, MemorySink::new()).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(replicator, rx));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        let replicator = handle.await.unwrap().unwrap();
        assert_eq!(replicator.sink().contents().cluster_count(), 1);
        assert!(replicator.metrics().snapshot().polls >= 1);
    }

    #[tokio::test]
    async fn test_fatal_poll_stops_driver() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("job_queue.log");
        fs::write(&log, "107 1 CreationTimestamp 10\n").unwrap();

        let mut sink = MemorySink::new();
        sink.overwrite_state(Some(StateRow {
            payload: "not json".into(),
            checksum: 0,
        }));
        let replicator = Replicator::new(ReplicatorConfig::new(&log), sink).unwrap();

        let (_tx, rx) = watch::channel(false);
        let err = run(replicator, rx).await.err().unwrap();
        assert!(err.is_fatal());
    }
}
