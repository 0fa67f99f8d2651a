//! Flipper rollout engine: restarts matching workloads on an interval.
//!
//! One call to [`RolloutEngine::reconcile`] handles one `RollingUpdate`
//! record: decide whether a rollout is due, stamp every matching workload
//! with a restart marker, and record what was touched. The batch is
//! all-or-nothing: the record's status only advances when every workload
//! write succeeded.
//!
//! # Components
//!
//! - **`matcher`**: selects candidate workloads for a label selector
//! - **`marker`**: the restart annotations and the pure mutator that applies them
//! - **`retry`**: bounded backoff policy for version conflicts
//! - **`writer`**: read-modify-write under optimistic concurrency
//! - **`engine`**: the reconciliation state machine

pub mod engine;
pub mod marker;
pub mod matcher;
pub mod retry;
pub mod writer;

pub use engine::{Action, Decision, EngineConfig, ReconcileError, RolloutEngine, evaluate};
pub use marker::{RolloutMarker, apply_marker};
pub use matcher::select_candidates;
pub use retry::RetryPolicy;
pub use writer::{ConflictSafeWriter, WriteError};
