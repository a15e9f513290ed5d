//! Replication orchestrator
//!
//! One `poll` walks the state machine:
//!
//! ```text
//! Idle -> Probing -> Idle                                  (no change, skipped, probe error)
//!                 -> ApplyingIncremental -> PersistingCursor -> Idle
//!                 -> [DrainingPredecessors ->] Rebuilding -> PersistingCursor -> Idle
//! ```
//!
//! Every sink write happens inside a sink transaction together with the
//! state row that describes it. An incremental batch commits one unit at a
//! time, so a failure keeps the units already committed and their cursor.
//! Draining and rebuilding share one transaction, so a failure there leaves
//! the sink exactly as the last good state describes it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::joblog::{CorruptionReport, LogParser, LogRecord};
use crate::mirror::{apply_record, Divergence, DivergenceReason, JobQueueMirror};
use crate::observability::{Event, Logger, ReplicationMetrics};
use crate::probe::{LogStat, ProbeOutcome, ProbeState, Prober, RebuildReason};

use super::config::ReplicatorConfig;
use super::cursor::{PollingState, ResumptionCursor, StateRow};
use super::errors::{ReplicationError, ReplicationResult};
use super::generations::{open_generation, DrainPlan, GenerationSource};
use super::mutation::{translate, SinkMutation};
use super::sink::{ExecOutcome, ReplicationSink};
use super::units::UnitReader;

/// Replicator state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorPhase {
    Idle,
    Probing,
    Rebuilding,
    ApplyingIncremental,
    DrainingPredecessors,
    PersistingCursor,
}

impl ReplicatorPhase {
    /// Upper-case name used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicatorPhase::Idle => "IDLE",
            ReplicatorPhase::Probing => "PROBING",
            ReplicatorPhase::Rebuilding => "REBUILDING",
            ReplicatorPhase::ApplyingIncremental => "APPLYING_INCREMENTAL",
            ReplicatorPhase::DrainingPredecessors => "DRAINING_PREDECESSORS",
            ReplicatorPhase::PersistingCursor => "PERSISTING_CURSOR",
        }
    }

    /// Whether `next` may follow this phase. Any phase may fall back to Idle.
    pub fn can_transition_to(&self, next: ReplicatorPhase) -> bool {
        use ReplicatorPhase::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Probing)
                | (Probing, Rebuilding)
                | (Probing, ApplyingIncremental)
                | (Probing, DrainingPredecessors)
                | (DrainingPredecessors, Rebuilding)
                | (Rebuilding, PersistingCursor)
                | (ApplyingIncremental, PersistingCursor)
        )
    }
}

impl fmt::Display for ReplicatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a poll did nothing without probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The log file does not exist
    LogAbsent,
    /// Modification time and size match the last replay
    Unchanged,
}

/// What a poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped(SkipReason),
    NoChange,
    Rebuilt(RebuildReason),
    Incremental,
}

impl PollOutcome {
    /// Upper-case name used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Skipped(_) => "SKIPPED",
            PollOutcome::NoChange => "NO_CHANGE",
            PollOutcome::Rebuilt(_) => "REBUILT",
            PollOutcome::Incremental => "INCREMENTAL",
        }
    }
}

/// Summary of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub poll_id: Uuid,
    pub outcome: PollOutcome,
    /// Log records consumed, markers included
    pub records_applied: u64,
    /// Sink mutations that changed the store
    pub mutations: u64,
    pub anomalies: Vec<Divergence>,
    /// Last corruption contained while reading
    pub corruption: Option<CorruptionReport>,
    pub generations_drained: u64,
    pub generations_skipped: u64,
    pub transactions_discarded: u64,
    pub duration: Duration,
}

impl PollReport {
    fn new(poll_id: Uuid, outcome: PollOutcome) -> Self {
        Self {
            poll_id,
            outcome,
            records_applied: 0,
            mutations: 0,
            anomalies: Vec::new(),
            corruption: None,
            generations_drained: 0,
            generations_skipped: 0,
            transactions_discarded: 0,
            duration: Duration::ZERO,
        }
    }
}

// Totals for one pass over a log file.
#[derive(Debug, Default)]
struct BatchTally {
    records: u64,
    mutations: u64,
    anomalies: Vec<Divergence>,
    corruptions: u64,
    corruption: Option<CorruptionReport>,
    discarded: u64,
    last: Option<LogRecord>,
}

/// Keeps a sink consistent with one job queue log
pub struct Replicator<S: ReplicationSink> {
    config: ReplicatorConfig,
    prober: Prober,
    sink: S,
    phase: ReplicatorPhase,
    metrics: Arc<ReplicationMetrics>,
}

impl<S: ReplicationSink> Replicator<S> {
    /// Creates a replicator over a validated configuration
    pub fn new(config: ReplicatorConfig, sink: S) -> ReplicationResult<Self> {
        config.validate()?;

        Logger::info(
            Event::ReplicatorStart.as_str(),
            &[
                ("grouping", bool_str(config.transactional_grouping)),
                ("log", config.log_path.display().to_string().as_str()),
                ("poll_interval_secs", config.poll_interval_secs.to_string().as_str()),
                ("precheck", bool_str(config.precheck_enabled)),
            ],
        );

        Ok(Self {
            prober: Prober::new(&config.log_path),
            config,
            sink,
            phase: ReplicatorPhase::Idle,
            metrics: Arc::new(ReplicationMetrics::new()),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consumes the replicator, returning the sink
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Current phase; `Idle` between polls
    pub fn phase(&self) -> ReplicatorPhase {
        self.phase
    }

    /// Shared counters
    pub fn metrics(&self) -> Arc<ReplicationMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Reads and verifies the persisted state; initial if none was stored
    pub fn load_state(&self) -> ReplicationResult<PollingState> {
        match self.sink.load_state()? {
            Some(row) => row.unseal(),
            None => Ok(PollingState::initial()),
        }
    }

    /// Runs one poll.
    ///
    /// Non-fatal errors leave the persisted state untouched and are safe
    /// to retry. Fatal errors mean the persisted state cannot be trusted.
    pub fn poll(&mut self) -> ReplicationResult<PollReport> {
        let poll_id = Uuid::new_v4();
        let started = Instant::now();
        let id = poll_id.to_string();
        self.metrics.increment_polls();
        Logger::info(Event::PollBegin.as_str(), &[("poll_id", id.as_str())]);

        let result = self.run_poll(poll_id).map(|mut report| {
            report.duration = started.elapsed();
            report
        });
        self.enter(ReplicatorPhase::Idle);

        match &result {
            Ok(report) => {
                self.metrics
                    .record_batch(report.records_applied, report.duration.as_millis() as u64);
                Logger::info(
                    Event::PollComplete.as_str(),
                    &[
                        ("anomalies", report.anomalies.len().to_string().as_str()),
                        ("duration_ms", report.duration.as_millis().to_string().as_str()),
                        ("mutations", report.mutations.to_string().as_str()),
                        ("outcome", report.outcome.as_str()),
                        ("poll_id", id.as_str()),
                        ("records", report.records_applied.to_string().as_str()),
                    ],
                );
            }
            Err(e) => {
                self.metrics.increment_poll_failures();
                let fields = [
                    ("code", e.code()),
                    ("error", e.message.as_str()),
                    ("poll_id", id.as_str()),
                ];
                if e.is_fatal() {
                    Logger::fatal(Event::StateInconsistent.as_str(), &fields);
                } else {
                    Logger::error(Event::PollFailed.as_str(), &fields);
                }
            }
        }

        result
    }

    fn run_poll(&mut self, poll_id: Uuid) -> ReplicationResult<PollReport> {
        let state = self.load_state()?;

        let stat = match LogStat::read(&self.config.log_path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(self.skip(poll_id, SkipReason::LogAbsent));
            }
            Err(e) => {
                return Err(ReplicationError::io_failed(format!(
                    "failed to stat {}: {}",
                    self.config.log_path.display(),
                    e
                )))
            }
        };

        if self.config.precheck_enabled && state.probe.unchanged_since(&stat) {
            return Ok(self.skip(poll_id, SkipReason::Unchanged));
        }

        self.enter(ReplicatorPhase::Probing);
        let cursor = state.cursor_record();
        let (outcome, current) = self.prober.probe(&state.probe, cursor.as_ref());
        Logger::info(
            Event::ProbeResult.as_str(),
            &[
                ("outcome", outcome.to_string().as_str()),
                ("poll_id", poll_id.to_string().as_str()),
            ],
        );

        let current = match (outcome.clone(), current) {
            (ProbeOutcome::ProbeError(reason), _) => {
                return Err(ReplicationError::probe_failed(reason));
            }
            (ProbeOutcome::NoChange, _) => {
                return Ok(PollReport::new(poll_id, PollOutcome::NoChange));
            }
            (_, Some(current)) => current,
            (_, None) => {
                return Err(ReplicationError::probe_failed(
                    "probe classified the log without reading its state",
                ))
            }
        };

        match outcome {
            ProbeOutcome::Incremental => {
                let mut report = PollReport::new(poll_id, PollOutcome::Incremental);
                self.apply_incremental(&state, current, &mut report)?;
                Ok(report)
            }
            ProbeOutcome::FullRebuild(reason) => {
                let mut report = PollReport::new(poll_id, PollOutcome::Rebuilt(reason));
                let plan = match reason {
                    RebuildReason::Rotated {
                        previous,
                        current: latest,
                    } if self.config.drain_predecessors && !state.probe.is_initial() => {
                        let resume = state.cursor.as_ref().map(|c| c.next_offset).unwrap_or(0);
                        Some(DrainPlan::new(previous, latest, resume))
                    }
                    _ => None,
                };
                self.full_rebuild(plan, current, &mut report)?;
                Ok(report)
            }
            _ => Ok(PollReport::new(poll_id, PollOutcome::NoChange)),
        }
    }

    fn skip(&mut self, poll_id: Uuid, reason: SkipReason) -> PollReport {
        self.metrics.increment_polls_skipped();
        let why = match reason {
            SkipReason::LogAbsent => "log absent",
            SkipReason::Unchanged => "unchanged since last replay",
        };
        Logger::info(
            Event::PollSkipped.as_str(),
            &[
                ("poll_id", poll_id.to_string().as_str()),
                ("reason", why),
            ],
        );
        PollReport::new(poll_id, PollOutcome::Skipped(reason))
    }

    fn enter(&mut self, next: ReplicatorPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal phase transition {} -> {}",
            self.phase,
            next
        );
        Logger::trace(
            Event::PhaseChanged.as_str(),
            &[("from", self.phase.as_str()), ("to", next.as_str())],
        );
        self.phase = next;
    }

    // --- incremental ------------------------------------------------------

    fn apply_incremental(
        &mut self,
        state: &PollingState,
        current: ProbeState,
        report: &mut PollReport,
    ) -> ReplicationResult<()> {
        self.enter(ReplicatorPhase::ApplyingIncremental);
        let cursor = state.cursor.clone().ok_or_else(|| {
            ReplicationError::state_inconsistent("incremental replay requested without a cursor")
        })?;
        Logger::info(
            Event::IncrementalBegin.as_str(),
            &[("offset", cursor.next_offset.to_string().as_str())],
        );

        let mut parser = LogParser::open(&self.config.log_path)?;
        parser.seek(cursor.next_offset)?;

        // One sink transaction per unit, each recording the cursor after
        // its unit on top of the previous probe state.
        let previous = state.probe;
        let grouping = self.config.transactional_grouping;
        let tally = replay_units(&mut parser, grouping, |unit| {
            let row = match unit.last() {
                Some(last) => Some(StateRow::seal(&PollingState::advanced(
                    previous,
                    Some(ResumptionCursor::after(last)),
                ))?),
                None => None,
            };
            self.transact(|this| execute_unit(&mut this.sink, unit, row.as_ref()))
        })?;

        self.enter(ReplicatorPhase::PersistingCursor);
        let cursor = tally
            .last
            .as_ref()
            .map(ResumptionCursor::after)
            .or(Some(cursor));
        let row = StateRow::seal(&PollingState::advanced(current, cursor))?;
        self.transact(|this| Ok(this.sink.store_state(&row)?))?;
        self.log_cursor_persisted(&row);

        Logger::info(
            Event::IncrementalComplete.as_str(),
            &[
                ("mutations", tally.mutations.to_string().as_str()),
                ("records", tally.records.to_string().as_str()),
            ],
        );
        self.absorb(report, tally);
        self.metrics.increment_incremental_batches();
        Ok(())
    }

    // --- rebuild ----------------------------------------------------------

    // Drains `plan` (if any) and rebuilds from the current log in a single
    // sink transaction, so a failure anywhere leaves the sink untouched.
    fn full_rebuild(
        &mut self,
        plan: Option<DrainPlan>,
        current: ProbeState,
        report: &mut PollReport,
    ) -> ReplicationResult<()> {
        let staged = self.transact(|this| {
            let drained = match &plan {
                Some(plan) if !plan.is_empty() => this.drain_predecessors(plan, report)?,
                _ => Vec::new(),
            };
            let rebuilt = this.rebuild(current)?;
            Ok((drained, rebuilt))
        })?;
        let (drained, (row, mirror, tally)) = staged;

        for (generation, tally) in drained {
            let start = plan.as_ref().map(|p| p.start_offset(generation)).unwrap_or(0);
            Logger::info(
                Event::GenerationDrained.as_str(),
                &[
                    ("generation", generation.to_string().as_str()),
                    (
                        "log",
                        self.config.generation_path(generation).display().to_string().as_str(),
                    ),
                    ("records", tally.records.to_string().as_str()),
                    ("start", start.to_string().as_str()),
                ],
            );
            self.absorb(report, tally);
            self.metrics.increment_generations_drained();
            report.generations_drained += 1;
        }

        self.log_cursor_persisted(&row);
        Logger::info(
            Event::RebuildComplete.as_str(),
            &[
                ("clusters", mirror.cluster_count().to_string().as_str()),
                ("history", mirror.history_count().to_string().as_str()),
                ("procs", mirror.proc_count().to_string().as_str()),
                ("records", tally.records.to_string().as_str()),
            ],
        );
        self.absorb(report, tally);
        self.metrics.increment_rebuilds();
        Ok(())
    }

    // Replays the current log into a fresh mirror and loads it, with the
    // new state row, into the open transaction.
    fn rebuild(
        &mut self,
        current: ProbeState,
    ) -> ReplicationResult<(StateRow, JobQueueMirror, BatchTally)> {
        self.enter(ReplicatorPhase::Rebuilding);
        Logger::info(
            Event::RebuildBegin.as_str(),
            &[("sequence", current.sequence_number.to_string().as_str())],
        );

        let mut parser = LogParser::open(&self.config.log_path)?;
        let mut mirror = JobQueueMirror::with_buckets(self.config.bucket_count);
        let mut tally = replay_units(&mut parser, self.config.transactional_grouping, |unit| {
            let anomalies = unit
                .iter()
                .filter_map(|record| apply_record(&mut mirror, record))
                .collect();
            Ok((0, anomalies))
        })?;

        self.enter(ReplicatorPhase::PersistingCursor);
        let cursor = tally.last.as_ref().map(ResumptionCursor::after);
        let row = StateRow::seal(&PollingState::advanced(current, cursor))?;
        tally.mutations = load_mirror(&mut self.sink, &mirror, &row)?;
        Ok((row, mirror, tally))
    }

    // --- predecessors -----------------------------------------------------

    // Applies every usable predecessor generation inside the open
    // transaction; returns the tally of each one drained.
    fn drain_predecessors(
        &mut self,
        plan: &DrainPlan,
        report: &mut PollReport,
    ) -> ReplicationResult<Vec<(u64, BatchTally)>> {
        self.enter(ReplicatorPhase::DrainingPredecessors);
        let mut drained = Vec::new();

        for generation in plan.generations.clone() {
            let path = self.config.generation_path(generation);
            let start = plan.start_offset(generation);

            let mut parser = match open_generation(&path, generation, start) {
                GenerationSource::Ready(parser) => parser,
                GenerationSource::Skipped(reason) => {
                    self.metrics.increment_generations_skipped();
                    report.generations_skipped += 1;
                    Logger::warn(
                        Event::GenerationSkipped.as_str(),
                        &[
                            ("generation", generation.to_string().as_str()),
                            ("log", path.display().to_string().as_str()),
                            ("reason", reason.as_str()),
                        ],
                    );
                    continue;
                }
            };

            // Each later generation starts from a compacted snapshot of the
            // whole queue, so the live partitions are replaced.
            if plan.is_subsequent(generation) {
                self.sink.execute(&SinkMutation::Truncate)?;
            }

            let grouping = self.config.transactional_grouping;
            let sink = &mut self.sink;
            let tally = replay_units(&mut parser, grouping, |unit| execute_unit(sink, unit, None))?;
            drained.push((generation, tally));
        }

        Ok(drained)
    }

    // --- bookkeeping ------------------------------------------------------

    // Runs `work` inside one sink transaction, rolling back on any failure.
    fn transact<T, F>(&mut self, work: F) -> ReplicationResult<T>
    where
        F: FnOnce(&mut Self) -> ReplicationResult<T>,
    {
        self.sink.begin()?;
        let result = work(&mut *self).and_then(|value| {
            self.sink.commit()?;
            Ok(value)
        });
        if let Err(e) = &result {
            Logger::error(
                Event::SinkFailure.as_str(),
                &[("code", e.code()), ("error", e.message.as_str())],
            );
            if let Err(rollback) = self.sink.rollback() {
                Logger::warn(
                    Event::SinkFailure.as_str(),
                    &[("rollback", rollback.to_string().as_str())],
                );
            }
        }
        result
    }

    fn absorb(&self, report: &mut PollReport, tally: BatchTally) {
        for divergence in &tally.anomalies {
            Logger::warn(
                Event::SchemaDivergence.as_str(),
                &[
                    ("key", divergence.key.as_str()),
                    ("offset", divergence.offset.to_string().as_str()),
                    ("reason", divergence.reason.as_str()),
                ],
            );
        }
        for _ in 0..tally.corruptions {
            self.metrics.increment_corruptions();
        }
        for _ in 0..tally.discarded {
            self.metrics.increment_transactions_discarded();
        }
        self.metrics.add_records_applied(tally.records);
        self.metrics.add_mutations_executed(tally.mutations);
        self.metrics.add_anomalies(tally.anomalies.len() as u64);

        report.records_applied += tally.records;
        report.mutations += tally.mutations;
        report.anomalies.extend(tally.anomalies);
        report.transactions_discarded += tally.discarded;
        if tally.corruption.is_some() {
            report.corruption = tally.corruption;
        }
    }

    fn log_cursor_persisted(&self, row: &StateRow) {
        Logger::info(
            Event::CursorPersisted.as_str(),
            &[("checksum", format!("{:08x}", row.checksum).as_str())],
        );
    }
}

// Reads units from the parser's position and hands each to `apply`, which
// returns (mutations, anomalies) for it.
fn replay_units<F>(parser: &mut LogParser, grouping: bool, mut apply: F) -> ReplicationResult<BatchTally>
where
    F: FnMut(&[LogRecord]) -> ReplicationResult<(u64, Vec<Divergence>)>,
{
    let mut tally = BatchTally::default();
    let mut reader = UnitReader::new(parser, grouping);

    while let Some(unit) = reader.next_unit()? {
        let (mutations, anomalies) = apply(&unit)?;
        tally.records += unit.len() as u64;
        tally.mutations += mutations;
        tally.anomalies.extend(anomalies);
        if let Some(last) = unit.last() {
            tally.last = Some(last.clone());
        }
    }

    tally.discarded = reader.discarded();
    tally.corruptions = reader.corruptions();
    tally.corruption = reader.last_corruption().cloned();
    Ok(tally)
}

// Translates and executes one unit; returns (mutations, anomalies).
fn execute_unit<S: ReplicationSink>(
    sink: &mut S,
    unit: &[LogRecord],
    row: Option<&StateRow>,
) -> ReplicationResult<(u64, Vec<Divergence>)> {
    let mut mutations = 0;
    let mut anomalies = Vec::new();

    for record in unit {
        let mutation = match translate(record) {
            Ok(Some(mutation)) => mutation,
            Ok(None) => continue,
            Err(divergence) => {
                anomalies.push(divergence);
                continue;
            }
        };

        let reason = match sink.execute(&mutation)? {
            ExecOutcome::Applied => {
                mutations += 1;
                Logger::trace(
                    Event::RecordApplied.as_str(),
                    &[
                        ("mutation", mutation.name()),
                        ("offset", record.offset.to_string().as_str()),
                    ],
                );
                continue;
            }
            ExecOutcome::MissingTarget => DivergenceReason::MissingRecord,
            ExecOutcome::Duplicate => DivergenceReason::DuplicateRecord,
        };
        anomalies.push(Divergence {
            offset: record.offset,
            key: record.operation.key().unwrap_or_default().to_string(),
            reason,
        });
    }

    if let Some(row) = row {
        sink.store_state(row)?;
    }
    Ok((mutations, anomalies))
}

// Replaces the sink's live contents with the mirror; returns mutations.
fn load_mirror<S: ReplicationSink>(
    sink: &mut S,
    mirror: &JobQueueMirror,
    row: &StateRow,
) -> ReplicationResult<u64> {
    let mut mutations = 0;
    if sink.execute(&SinkMutation::Truncate)? == ExecOutcome::Applied {
        mutations += 1;
    }
    for entry in mirror.export_all() {
        // History loads replace any older snapshot under the same key.
        if sink.execute(&SinkMutation::load(&entry))? == ExecOutcome::Applied {
            mutations += 1;
        }
    }
    sink.store_state(row)?;
    Ok(mutations)
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
