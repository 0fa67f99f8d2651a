//! Read-modify-write of workloads under optimistic concurrency.
//!
//! Every attempt starts from a freshly fetched object so the write carries
//! the current version token. Only version conflicts are retried, and only
//! up to the policy's attempt ceiling; every other failure is terminal.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use flipper_core::{Shutdown, StoreError, Workload, WorkloadRef, WorkloadStore};

use crate::retry::RetryPolicy;

/// Why a workload write gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// Every attempt hit a version conflict.
    #[error("{workload}: still conflicting after {attempts} attempts")]
    ConflictExhausted { workload: String, attempts: u32 },

    /// The store refused the read or the write for a non-conflict reason.
    #[error("{workload}: write rejected: {reason}")]
    WriteRejected { workload: String, reason: String },

    #[error("{0}: workload not found")]
    NotFound(String),

    #[error("{0}: write cancelled")]
    Cancelled(String),
}

pub struct ConflictSafeWriter {
    store: Arc<dyn WorkloadStore>,
    policy: RetryPolicy,
}

impl ConflictSafeWriter {
    pub fn new(store: Arc<dyn WorkloadStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `reference`, apply `mutate`, and write it back, retrying on
    /// version conflicts. `mutate` runs once per attempt on the fresh copy.
    pub async fn write<F>(
        &self,
        reference: &WorkloadRef,
        mut mutate: F,
        shutdown: &Shutdown,
    ) -> Result<Workload, WriteError>
    where
        F: FnMut(&mut Workload) + Send,
    {
        let name = reference.to_string();
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut current = shutdown
                .guard(self.store.get(reference))
                .await
                .map_err(|_| WriteError::Cancelled(name.clone()))?
                .map_err(|e| terminal(&name, e))?;

            mutate(&mut current);

            let outcome = shutdown
                .guard(self.store.update(&current))
                .await
                .map_err(|_| WriteError::Cancelled(name.clone()))?;

            match outcome {
                Ok(stored) => {
                    debug!(workload = %name, attempt, "workload written");
                    return Ok(stored);
                }
                Err(StoreError::Conflict(_)) if attempt < self.policy.attempts => {
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        workload = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "version conflict, retrying"
                    );
                    shutdown
                        .sleep(delay)
                        .await
                        .map_err(|_| WriteError::Cancelled(name.clone()))?;
                }
                Err(StoreError::Conflict(_)) => {
                    warn!(workload = %name, attempts = attempt, "conflict retry budget exhausted");
                    return Err(WriteError::ConflictExhausted {
                        workload: name,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(terminal(&name, e)),
            }
        }
    }
}

/// Map a non-retryable store error to its write error.
fn terminal(name: &str, err: StoreError) -> WriteError {
    match err {
        StoreError::NotFound(_) => WriteError::NotFound(name.to_string()),
        other => WriteError::WriteRejected {
            workload: name.to_string(),
            reason: other.to_string(),
        },
    }
}
