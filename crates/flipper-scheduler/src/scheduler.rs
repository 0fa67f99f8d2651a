//! Scheduler: the loop that decides when each record is reconciled.
//!
//! Records enter the queue from a periodic resync of the record store and
//! from [`SchedulerHandle::enqueue`]. Due records are reconciled
//! concurrently up to `max_concurrent`, but a record is never reconciled
//! twice at once. The reconciler's answer decides when it comes back:
//!
//! - `Requeue(d)`: again after `d`
//! - `AwaitChange`: dropped until something enqueues it again
//! - error: exponential backoff per record, or the maximum backoff when
//!   the error will not clear without a change to the record

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use flipper_core::config::SchedulerConfig;
use flipper_core::{RecordRef, RecordStore, Shutdown};
use flipper_rollout::{Action, ReconcileError, RolloutEngine};

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::WorkQueue;

pub type ReconcileFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Action, ReconcileError>> + Send + 'a>>;

/// Anything that can reconcile a single record.
pub trait Reconciler: Send + Sync {
    fn reconcile<'a>(
        &'a self,
        reference: &'a RecordRef,
        shutdown: &'a Shutdown,
    ) -> ReconcileFuture<'a>;
}

impl Reconciler for RolloutEngine {
    fn reconcile<'a>(
        &'a self,
        reference: &'a RecordRef,
        shutdown: &'a Shutdown,
    ) -> ReconcileFuture<'a> {
        Box::pin(RolloutEngine::reconcile(self, reference, shutdown))
    }
}

type Outcome = (RecordRef, Result<Action, ReconcileError>);

/// Cloneable way to poke a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<RecordRef>,
}

impl SchedulerHandle {
    /// Ask for `reference` to be reconciled as soon as possible.
    pub fn enqueue(&self, reference: RecordRef) -> SchedulerResult<()> {
        self.tx.send(reference).map_err(|_| SchedulerError::Stopped)
    }
}

pub struct Scheduler {
    reconciler: Arc<dyn Reconciler>,
    records: Arc<dyn RecordStore>,
    config: SchedulerConfig,
    queue: WorkQueue,
    /// Records being reconciled right now, with their task ids.
    in_flight: HashMap<RecordRef, Id>,
    /// In-flight records that were asked for again while running.
    dirty: HashSet<RecordRef>,
    /// Consecutive failures per record.
    failures: HashMap<RecordRef, u32>,
    tx: mpsc::UnboundedSender<RecordRef>,
    rx: mpsc::UnboundedReceiver<RecordRef>,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        records: Arc<dyn RecordStore>,
        config: SchedulerConfig,
    ) -> SchedulerResult<Self> {
        if config.max_concurrent == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if config.resync_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "resync_secs must be at least 1".into(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            reconciler,
            records,
            config,
            queue: WorkQueue::new(),
            in_flight: HashMap::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
            tx,
            rx,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run until `shutdown` fires. In-flight reconciliations see the same
    /// signal and are awaited before returning.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!(
            resync_secs = self.config.resync_secs,
            max_concurrent = self.config.max_concurrent,
            "scheduler started"
        );

        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut resync = tokio::time::interval(self.config.resync_interval());
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.dispatch(&mut tasks, &shutdown);

            let wake = self.queue.next_deadline();
            let has_capacity = tasks.len() < self.config.max_concurrent;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = resync.tick() => self.resync(&shutdown).await,
                Some(reference) = self.rx.recv() => {
                    debug!(record = %reference, "record enqueued");
                    self.queue.schedule(reference, Instant::now());
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.complete(joined);
                }
                _ = sleep_until(wake), if wake.is_some() && has_capacity => {}
            }
        }

        info!(in_flight = tasks.len(), "scheduler shutting down");
        while let Some(joined) = tasks.join_next_with_id().await {
            self.complete(joined);
        }
        info!("scheduler stopped");
    }

    /// Queue every record the store knows about for an immediate pass.
    /// Records in error backoff keep their backoff deadline.
    async fn resync(&mut self, shutdown: &Shutdown) {
        let listed = match shutdown.guard(self.records.list_records()).await {
            Ok(listed) => listed,
            Err(_) => return,
        };
        match listed {
            Ok(references) => {
                let now = Instant::now();
                debug!(records = references.len(), "resync");
                for reference in references {
                    if self.failures.contains_key(&reference) {
                        continue;
                    }
                    self.queue.schedule(reference, now);
                }
            }
            Err(e) => warn!(error = %e, "resync failed to list records"),
        }
    }

    /// Start reconciliations for due records while there is capacity.
    fn dispatch(&mut self, tasks: &mut JoinSet<Outcome>, shutdown: &Shutdown) {
        while tasks.len() < self.config.max_concurrent {
            let Some(reference) = self.queue.pop_due(Instant::now()) else {
                break;
            };
            if self.in_flight.contains_key(&reference) {
                self.dirty.insert(reference);
                continue;
            }

            let reconciler = self.reconciler.clone();
            let shutdown = shutdown.clone();
            let task_ref = reference.clone();
            let handle = tasks.spawn(async move {
                let outcome = reconciler.reconcile(&task_ref, &shutdown).await;
                (task_ref, outcome)
            });
            debug!(record = %reference, "reconcile started");
            self.in_flight.insert(reference, handle.id());
        }
    }

    fn complete(&mut self, joined: Result<(Id, Outcome), JoinError>) {
        let (reference, outcome) = match joined {
            Ok((_, outcome)) => outcome,
            Err(e) => {
                let Some(reference) = self.take_by_task(e.id()) else {
                    error!(error = %e, "unknown reconcile task failed");
                    return;
                };
                error!(record = %reference, error = %e, "reconcile task panicked");
                self.back_off(reference, true);
                return;
            }
        };
        self.in_flight.remove(&reference);

        match outcome {
            Ok(Action::Requeue(delay)) => {
                self.failures.remove(&reference);
                debug!(record = %reference, delay_secs = delay.as_secs(), "requeued");
                self.queue.schedule_after(reference.clone(), delay);
            }
            Ok(Action::AwaitChange) => {
                self.failures.remove(&reference);
                self.queue.forget(&reference);
                debug!(record = %reference, "forgotten until next change");
            }
            Err(ReconcileError::Cancelled(_)) => {
                debug!(record = %reference, "reconcile cancelled");
            }
            Err(e) => {
                warn!(record = %reference, error = %e, "reconcile failed");
                let retryable = e.is_retryable();
                self.back_off(reference.clone(), retryable);
            }
        }

        if self.dirty.remove(&reference) {
            self.queue.schedule(reference, Instant::now());
        }
    }

    fn back_off(&mut self, reference: RecordRef, retryable: bool) {
        let failures = self.failures.entry(reference.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        let delay = if retryable {
            error_backoff(&self.config, *failures)
        } else {
            self.config.error_backoff_max()
        };
        debug!(
            record = %reference,
            failures = *failures,
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );
        self.queue.schedule_after(reference, delay);
    }

    fn take_by_task(&mut self, id: Id) -> Option<RecordRef> {
        let reference = self
            .in_flight
            .iter()
            .find(|(_, task)| **task == id)
            .map(|(reference, _)| reference.clone())?;
        self.in_flight.remove(&reference);
        Some(reference)
    }
}

/// `base * 2^(failures-1)`, capped at the configured maximum.
pub fn error_backoff(config: &SchedulerConfig, failures: u32) -> Duration {
    let base = config.error_backoff_base();
    let max = config.error_backoff_max();
    let exp = failures.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).map_or(max, |d| d.min(max))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
