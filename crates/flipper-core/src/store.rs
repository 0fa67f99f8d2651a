//! Store traits the engine reads and writes through.
//!
//! Two backends implement them: the embedded redb store in
//! `flipper-state` and the Kubernetes API in `flipper-kube`. Methods
//! return boxed futures so the traits stay object-safe and the engine
//! can hold `Arc<dyn WorkloadStore>`.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::selector::LabelSelector;
use crate::types::{ObservedState, RecordRef, RollingUpdate, Workload, WorkloadRef};

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Failure classes a backend must distinguish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The object changed since it was read (stale write-version token).
    #[error("version conflict on {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the write (validation, permissions, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transport or storage failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Access to deployment-like workloads.
pub trait WorkloadStore: Send + Sync {
    /// List workloads in `namespace` carrying every label in `selector`.
    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a LabelSelector,
    ) -> StoreFuture<'a, Vec<Workload>>;

    /// Fetch the current version of a workload.
    fn get<'a>(&'a self, reference: &'a WorkloadRef) -> StoreFuture<'a, Workload>;

    /// Write annotations back, guarded by `workload.resource_version`.
    /// Returns the stored object with its new version token.
    fn update<'a>(&'a self, workload: &'a Workload) -> StoreFuture<'a, Workload>;
}

/// Access to desired-state records and their status.
pub trait RecordStore: Send + Sync {
    /// Fetch a record, `None` if it no longer exists.
    fn get_record<'a>(&'a self, reference: &'a RecordRef)
    -> StoreFuture<'a, Option<RollingUpdate>>;

    /// List references to every record the controller manages.
    fn list_records(&self) -> StoreFuture<'_, Vec<RecordRef>>;

    /// Replace the observed status of `record`, guarded by its
    /// `resource_version`.
    fn update_status<'a>(
        &'a self,
        record: &'a RollingUpdate,
        status: &'a ObservedState,
    ) -> StoreFuture<'a, ()>;
}
