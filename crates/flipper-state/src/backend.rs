//! Store-trait implementations over the embedded store.
//!
//! Selector filtering happens here, the way an API server filters a
//! labelled list before returning it.

use flipper_core::{
    LabelSelector, ObservedState, RecordRef, RecordStore, RollingUpdate, StoreError, StoreFuture,
    Workload, WorkloadRef, WorkloadStore,
};

use crate::error::StateError;
use crate::store::StateStore;

impl From<StateError> for StoreError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict { key, .. } => StoreError::Conflict(key),
            StateError::NotFound(key) => StoreError::NotFound(key),
            StateError::Manifest(msg) => StoreError::Rejected(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl WorkloadStore for StateStore {
    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a LabelSelector,
    ) -> StoreFuture<'a, Vec<Workload>> {
        Box::pin(async move {
            let mut workloads = self.list_workloads(namespace)?;
            workloads.retain(|w| selector.matches(&w.labels));
            Ok(workloads)
        })
    }

    fn get<'a>(&'a self, reference: &'a WorkloadRef) -> StoreFuture<'a, Workload> {
        Box::pin(async move {
            let key = reference.key();
            self.get_workload(&key)?
                .ok_or(StoreError::NotFound(key))
        })
    }

    fn update<'a>(&'a self, workload: &'a Workload) -> StoreFuture<'a, Workload> {
        Box::pin(async move { Ok(self.update_workload(workload)?) })
    }
}

impl RecordStore for StateStore {
    fn get_record<'a>(
        &'a self,
        reference: &'a RecordRef,
    ) -> StoreFuture<'a, Option<RollingUpdate>> {
        Box::pin(async move { Ok(StateStore::get_record(self, &reference.key())?) })
    }

    fn list_records(&self) -> StoreFuture<'_, Vec<RecordRef>> {
        Box::pin(async move {
            let records = StateStore::list_records(self)?;
            Ok(records.iter().map(RollingUpdate::reference).collect())
        })
    }

    fn update_status<'a>(
        &'a self,
        record: &'a RollingUpdate,
        status: &'a ObservedState,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.write_status(record, status)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_core::{DesiredState, ObjectRef};

    #[tokio::test]
    async fn list_applies_selector() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_workload(&Workload::new("default", "web").with_label("app", "web"))
            .unwrap();
        store
            .put_workload(&Workload::new("default", "db").with_label("app", "db"))
            .unwrap();

        let selector: LabelSelector = [("app", "web")].into_iter().collect();
        let found = WorkloadStore::list(&store, "default", &selector).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "web");

        let all = WorkloadStore::list(&store, "default", &LabelSelector::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn get_missing_workload_maps_to_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = WorkloadStore::get(&store, &ObjectRef::new("default", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("default/nope".to_string()));
    }

    #[tokio::test]
    async fn stale_update_maps_to_conflict() {
        let store = StateStore::open_in_memory().unwrap();
        let read = store.put_workload(&Workload::new("default", "web")).unwrap();
        store.put_workload(&Workload::new("default", "web")).unwrap();

        let err = WorkloadStore::update(&store, &read).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn record_trait_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_record(&RollingUpdate::new("default", "nightly", DesiredState::default()))
            .unwrap();

        let refs = RecordStore::list_records(&store).await.unwrap();
        assert_eq!(refs, vec![ObjectRef::new("default", "nightly")]);

        let record = RecordStore::get_record(&store, &refs[0]).await.unwrap().unwrap();
        let status = ObservedState {
            last_rollout_time: None,
            affected_workloads: vec!["a".to_string()],
        };
        store.update_status(&record, &status).await.unwrap();

        let again = RecordStore::get_record(&store, &refs[0]).await.unwrap().unwrap();
        assert_eq!(again.status, status);
        // The record we read earlier is now stale.
        let err = store.update_status(&record, &status).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
