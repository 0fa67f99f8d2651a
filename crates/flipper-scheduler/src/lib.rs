//! flipper-scheduler: the timer-and-queue loop that drives reconciliation.
//!
//! The rollout engine never waits; it returns how long to wait. This crate
//! owns the waiting:
//!
//! ```text
//! Scheduler
//!   ├── WorkQueue (record ref → next deadline, earliest wins)
//!   ├── resync timer (list every record from the RecordStore)
//!   ├── SchedulerHandle (external enqueue, e.g. watch events)
//!   └── JoinSet of in-flight reconciles (≤ max_concurrent, one per record)
//! ```

pub mod error;
pub mod queue;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use queue::WorkQueue;
pub use scheduler::{ReconcileFuture, Reconciler, Scheduler, SchedulerHandle, error_backoff};
