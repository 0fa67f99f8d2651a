//! StateStore: redb-backed persistence for records and workloads.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing). Guarded writes run their version check and the write in a
//! single redb write transaction, so a concurrent writer either sees the
//! new version or fails its own check.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use flipper_core::{ObservedState, RollingUpdate, Workload};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Records ────────────────────────────────────────────────────

    /// Insert a record or replace its spec. An existing status is kept.
    pub fn put_record(&self, record: &RollingUpdate) -> StateResult<RollingUpdate> {
        let key = record.reference().key();
        let stored = self.modify(RECORDS, &key, |current: Option<RollingUpdate>| {
            let mut next = record.clone();
            match current {
                Some(existing) => {
                    next.status = existing.status;
                    next.resource_version = next_version(&existing.resource_version);
                }
                None => next.resource_version = next_version(""),
            }
            Ok(next)
        })?;
        debug!(%key, version = %stored.resource_version, "record stored");
        Ok(stored)
    }

    /// Get a record by `{namespace}/{name}` key.
    pub fn get_record(&self, key: &str) -> StateResult<Option<RollingUpdate>> {
        self.read_one(RECORDS, key)
    }

    /// List every record.
    pub fn list_records(&self) -> StateResult<Vec<RollingUpdate>> {
        self.read_prefix(RECORDS, "")
    }

    /// Delete a record by key. Returns true if it existed.
    pub fn delete_record(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(RECORDS, key)?;
        debug!(%key, existed, "record deleted");
        Ok(existed)
    }

    /// Replace a record's status if its version still matches
    /// `record.resource_version`.
    pub fn write_status(
        &self,
        record: &RollingUpdate,
        status: &ObservedState,
    ) -> StateResult<RollingUpdate> {
        let key = record.reference().key();
        let stored = self.modify(RECORDS, &key, |current: Option<RollingUpdate>| {
            let mut current = current.ok_or_else(|| StateError::NotFound(key.clone()))?;
            check_version(&key, &record.resource_version, &current.resource_version)?;
            current.status = status.clone();
            current.resource_version = next_version(&current.resource_version);
            Ok(current)
        })?;
        debug!(%key, version = %stored.resource_version, "record status written");
        Ok(stored)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or overwrite a workload without a version check.
    ///
    /// This is how outside actors (manifests, tests simulating another
    /// controller) change workloads; the engine always goes through
    /// [`update_workload`](Self::update_workload).
    pub fn put_workload(&self, workload: &Workload) -> StateResult<Workload> {
        let key = workload.reference().key();
        let stored = self.modify(WORKLOADS, &key, |current: Option<Workload>| {
            let mut next = workload.clone();
            let base = current.map(|c| c.resource_version).unwrap_or_default();
            next.resource_version = next_version(&base);
            Ok(next)
        })?;
        debug!(%key, version = %stored.resource_version, "workload stored");
        Ok(stored)
    }

    /// Get a workload by `{namespace}/{name}` key.
    pub fn get_workload(&self, key: &str) -> StateResult<Option<Workload>> {
        self.read_one(WORKLOADS, key)
    }

    /// List all workloads in a namespace.
    pub fn list_workloads(&self, namespace: &str) -> StateResult<Vec<Workload>> {
        self.read_prefix(WORKLOADS, &format!("{namespace}/"))
    }

    /// Overwrite a workload if its version still matches
    /// `workload.resource_version`.
    pub fn update_workload(&self, workload: &Workload) -> StateResult<Workload> {
        let key = workload.reference().key();
        self.modify(WORKLOADS, &key, |current: Option<Workload>| {
            let current = current.ok_or_else(|| StateError::NotFound(key.clone()))?;
            check_version(&key, &workload.resource_version, &current.resource_version)?;
            let mut next = workload.clone();
            next.resource_version = next_version(&current.resource_version);
            Ok(next)
        })
    }

    /// Delete a workload by key. Returns true if it existed.
    pub fn delete_workload(&self, key: &str) -> StateResult<bool> {
        self.remove(WORKLOADS, key)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn read_one<T: DeserializeOwned>(&self, def: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn read_prefix<T: DeserializeOwned>(&self, def: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove(&self, def: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a single key inside one write transaction.
    /// If `f` fails, nothing is written.
    fn modify<T, F>(&self, def: Table, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> StateResult<T>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = (|| -> StateResult<T> {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let next = f(current)?;
            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(next)
        })();

        match outcome {
            Ok(next) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(next)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }
}

fn check_version(key: &str, expected: &str, found: &str) -> StateResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StateError::Conflict {
            key: key.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

fn next_version(current: &str) -> String {
    let n: u64 = current.parse().unwrap_or(0);
    (n + 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_core::{DesiredState, LabelSelector};

    fn test_record(namespace: &str, name: &str) -> RollingUpdate {
        RollingUpdate::new(
            namespace,
            name,
            DesiredState {
                selector: [("app", "web")].into_iter().collect::<LabelSelector>(),
                interval: "1m".to_string(),
            },
        )
    }

    // ── Records ────────────────────────────────────────────────────

    #[test]
    fn record_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_record(&test_record("default", "nightly")).unwrap();
        assert_eq!(stored.resource_version, "1");

        let fetched = store.get_record("default/nightly").unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert_eq!(fetched.spec.interval, "1m");
    }

    #[test]
    fn record_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_record("default/nope").unwrap().is_none());
    }

    #[test]
    fn record_respec_keeps_status() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_record(&test_record("default", "nightly")).unwrap();
        let status = ObservedState {
            last_rollout_time: None,
            affected_workloads: vec!["web-1".to_string()],
        };
        store.write_status(&stored, &status).unwrap();

        let mut respec = test_record("default", "nightly");
        respec.spec.interval = "2h".to_string();
        let updated = store.put_record(&respec).unwrap();
        assert_eq!(updated.spec.interval, "2h");
        assert_eq!(updated.status, status);
        assert_eq!(updated.resource_version, "3");
    }

    #[test]
    fn write_status_rejects_stale_version() {
        let store = StateStore::open_in_memory().unwrap();
        let stale = store.put_record(&test_record("default", "nightly")).unwrap();
        store.put_record(&test_record("default", "nightly")).unwrap();

        let err = store
            .write_status(&stale, &ObservedState::default())
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
    }

    #[test]
    fn write_status_on_missing_record_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .write_status(&test_record("default", "ghost"), &ObservedState::default())
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn record_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_record(&test_record("a", "one")).unwrap();
        store.put_record(&test_record("b", "two")).unwrap();
        assert_eq!(store.list_records().unwrap().len(), 2);

        assert!(store.delete_record("a/one").unwrap());
        assert!(!store.delete_record("a/one").unwrap());
        assert_eq!(store.list_records().unwrap().len(), 1);
    }

    // ── Workloads ──────────────────────────────────────────────────

    #[test]
    fn workload_list_is_namespace_scoped() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workload(&Workload::new("prod", "api")).unwrap();
        store.put_workload(&Workload::new("prod", "web")).unwrap();
        store.put_workload(&Workload::new("production", "db")).unwrap();

        let prod = store.list_workloads("prod").unwrap();
        assert_eq!(prod.len(), 2);
        assert!(prod.iter().all(|w| w.namespace == "prod"));
    }

    #[test]
    fn guarded_update_bumps_version() {
        let store = StateStore::open_in_memory().unwrap();
        let mut w = store.put_workload(&Workload::new("prod", "api")).unwrap();
        w.annotations = Some([("k".to_string(), "v".to_string())].into());

        let updated = store.update_workload(&w).unwrap();
        assert_eq!(updated.resource_version, "2");
        assert_eq!(updated.annotation("k"), Some("v"));
    }

    #[test]
    fn guarded_update_detects_interleaved_write() {
        let store = StateStore::open_in_memory().unwrap();
        let read = store.put_workload(&Workload::new("prod", "api")).unwrap();

        // Another actor writes between our read and our update.
        store
            .put_workload(&Workload::new("prod", "api").with_label("owner", "other"))
            .unwrap();

        let err = store.update_workload(&read).unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
        // The other actor's write survives.
        let current = store.get_workload("prod/api").unwrap().unwrap();
        assert_eq!(current.labels.get("owner").map(String::as_str), Some("other"));
    }

    #[test]
    fn guarded_update_of_missing_workload_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_workload(&Workload::new("prod", "ghost")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("flipper.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_record(&test_record("prod", "nightly")).unwrap();
            store.put_workload(&Workload::new("prod", "api")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_record("prod/nightly").unwrap().is_some());
        assert!(store.get_workload("prod/api").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_records().unwrap().is_empty());
        assert!(store.list_workloads("any").unwrap().is_empty());
        assert!(!store.delete_record("nope/nope").unwrap());
        assert!(!store.delete_workload("nope/nope").unwrap());
    }
}
