//! Candidate selection.

use tracing::debug;

use flipper_core::{LabelSelector, StoreResult, Workload, WorkloadStore};

/// Workloads in `namespace` that carry every label in `selector`.
///
/// The store is asked to filter, and the result is filtered again so a
/// backend that over-returns cannot widen the rollout. Order is
/// unspecified; callers that need determinism sort.
pub async fn select_candidates(
    store: &dyn WorkloadStore,
    namespace: &str,
    selector: &LabelSelector,
) -> StoreResult<Vec<Workload>> {
    let mut candidates = store.list(namespace, selector).await?;
    let listed = candidates.len();
    candidates.retain(|w| w.namespace == namespace && selector.matches(&w.labels));
    debug!(
        %namespace,
        %selector,
        listed,
        matched = candidates.len(),
        "selected rollout candidates"
    );
    Ok(candidates)
}
