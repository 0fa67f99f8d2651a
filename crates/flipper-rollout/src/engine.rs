//! One reconciliation of one `RollingUpdate` record.
//!
//! A call moves through `Idle` (interval not elapsed), `Due`, `RollingOut`
//! (stamping candidates one by one) and `Recorded` (status persisted).
//! None of these phases are stored; the record's status is the only state
//! that survives a call, and it is written last.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use flipper_core::config::{DEFAULT_IDENTITY, DEFAULT_RECORD_KIND};
use flipper_core::{
    Cancelled, Clock, ControllerConfig, Interval, IntervalError, ObservedState, RecordRef, RecordStore,
    Shutdown, StoreError, Workload, WorkloadStore,
};

use crate::marker::RolloutMarker;
use crate::matcher::select_candidates;
use crate::retry::RetryPolicy;
use crate::writer::{ConflictSafeWriter, WriteError};

/// Shortest delay ever handed back to the scheduler.
pub const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// Process-wide settings passed into the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Written to the `restartedBy` marker.
    pub identity: String,
    /// Written to the record-kind marker.
    pub record_kind: String,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            record_kind: DEFAULT_RECORD_KIND.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ControllerConfig> for EngineConfig {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            identity: cfg.controller.identity.clone(),
            record_kind: cfg.controller.record_kind.clone(),
            retry: RetryPolicy::from(&cfg.retry),
        }
    }
}

/// What the scheduler should do with the record next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay.
    Requeue(Duration),
    /// Nothing to do until the record changes (it was deleted).
    AwaitChange,
}

impl Action {
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Action::Requeue(d) => Some(*d),
            Action::AwaitChange => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("{record}: failed to read record: {source}")]
    RecordFetchFailure { record: String, source: StoreError },

    /// Not retryable until someone fixes the record.
    #[error("{record}: {source}")]
    InvalidInterval { record: String, source: IntervalError },

    #[error("{record}: failed to list candidate workloads: {source}")]
    CandidateListFailure { record: String, source: StoreError },

    #[error("{record}: rollout of {workload} failed: {source}")]
    RolloutWriteFailure {
        record: String,
        workload: String,
        source: WriteError,
    },

    /// The rollout happened but its status did not stick.
    #[error("{record}: failed to persist status: {source}")]
    StatusPersistFailure { record: String, source: StoreError },

    #[error("{0}: reconciliation cancelled")]
    Cancelled(String),
}

impl ReconcileError {
    /// Whether reconciling again could succeed without a change to the record.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::InvalidInterval { .. } | ReconcileError::Cancelled(_)
        )
    }
}

/// Outcome of the due check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Due,
    Idle { remaining: Duration },
}

/// Decide whether a record whose last rollout was at `last` is due at `now`.
///
/// Due when there was no rollout yet or strictly more than `interval` has
/// elapsed; exactly `interval` is still idle. The idle delay is floored at
/// [`MIN_REQUEUE`] and never exceeds `interval`, so a last-rollout time in
/// the future waits at most one interval.
pub fn evaluate(last: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> Decision {
    let Some(last) = last else {
        return Decision::Due;
    };
    let span = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    let elapsed = now.signed_duration_since(last);
    if elapsed > span {
        return Decision::Due;
    }
    let remaining = span
        .checked_sub(&elapsed)
        .and_then(|d| d.to_std().ok())
        .unwrap_or(interval)
        .min(interval)
        .max(MIN_REQUEUE);
    Decision::Idle { remaining }
}

pub struct RolloutEngine {
    workloads: Arc<dyn WorkloadStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    writer: ConflictSafeWriter,
    config: EngineConfig,
}

impl RolloutEngine {
    pub fn new(
        workloads: Arc<dyn WorkloadStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let writer = ConflictSafeWriter::new(workloads.clone(), config.retry.clone());
        Self {
            workloads,
            records,
            clock,
            writer,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile one record: roll out if due, then tell the caller when to
    /// come back. On any error the record's status is left untouched.
    pub async fn reconcile(
        &self,
        reference: &RecordRef,
        shutdown: &Shutdown,
    ) -> Result<Action, ReconcileError> {
        let name = reference.to_string();
        let cancelled = |_: Cancelled| ReconcileError::Cancelled(name.clone());

        let fetched = shutdown
            .guard(self.records.get_record(reference))
            .await
            .map_err(cancelled)?
            .map_err(|source| ReconcileError::RecordFetchFailure {
                record: name.clone(),
                source,
            })?;
        let Some(record) = fetched else {
            debug!(record = %name, "record gone, dropping");
            return Ok(Action::AwaitChange);
        };

        let interval = Interval::parse(&record.spec.interval).map_err(|source| {
            warn!(record = %name, interval = %record.spec.interval, "invalid interval");
            ReconcileError::InvalidInterval {
                record: name.clone(),
                source,
            }
        })?;

        let now = self.clock.now();
        if let Decision::Idle { remaining } =
            evaluate(record.status.last_rollout_time, interval.as_duration(), now)
        {
            debug!(
                record = %name,
                remaining_secs = remaining.as_secs(),
                "rollout not due"
            );
            return Ok(Action::Requeue(remaining));
        }

        let mut candidates = shutdown
            .guard(select_candidates(
                self.workloads.as_ref(),
                &record.namespace,
                &record.spec.selector,
            ))
            .await
            .map_err(cancelled)?
            .map_err(|source| ReconcileError::CandidateListFailure {
                record: name.clone(),
                source,
            })?;
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.dedup_by(|a, b| a.name == b.name);

        info!(
            record = %name,
            selector = %record.spec.selector,
            candidates = candidates.len(),
            "rollout due"
        );

        for candidate in &candidates {
            let target = candidate.reference();
            let stamp = |workload: &mut Workload| {
                RolloutMarker::new(
                    self.clock.now(),
                    &self.config.identity,
                    &name,
                    &self.config.record_kind,
                )
                .apply_to(workload)
            };
            match self.writer.write(&target, stamp, shutdown).await {
                Ok(_) => debug!(record = %name, workload = %target, "workload restarted"),
                Err(WriteError::Cancelled(_)) => {
                    return Err(ReconcileError::Cancelled(name.clone()));
                }
                Err(source) => {
                    warn!(record = %name, workload = %target, error = %source, "rollout aborted");
                    return Err(ReconcileError::RolloutWriteFailure {
                        record: name.clone(),
                        workload: target.to_string(),
                        source,
                    });
                }
            }
        }

        let status = ObservedState {
            last_rollout_time: Some(now),
            affected_workloads: candidates.into_iter().map(|w| w.name).collect(),
        };
        shutdown
            .guard(self.records.update_status(&record, &status))
            .await
            .map_err(cancelled)?
            .map_err(|source| ReconcileError::StatusPersistFailure {
                record: name.clone(),
                source,
            })?;

        info!(
            record = %name,
            affected = ?status.affected_workloads,
            next_in_secs = interval.as_duration().as_secs(),
            "rollout recorded"
        );
        Ok(Action::Requeue(interval.as_duration()))
    }
}
