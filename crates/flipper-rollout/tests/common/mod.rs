//! Shared fixtures: an in-memory store with injectable faults, a manual
//! clock, and an engine wired to both.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use flipper_core::{
    DesiredState, LabelSelector, ManualClock, ObservedState, RecordRef, RecordStore,
    RollingUpdate, StoreError, StoreFuture, Workload, WorkloadRef, WorkloadStore,
};
use flipper_rollout::{EngineConfig, RetryPolicy, RolloutEngine};
use flipper_state::StateStore;

pub const NS: &str = "default";
pub const RECORD: &str = "nightly";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn record_ref() -> RecordRef {
    RecordRef::new(NS, RECORD)
}

/// Wraps a [`StateStore`] and misbehaves on request.
pub struct FaultyStore {
    pub inner: StateStore,
    /// Workload key -> number of updates to lose to a competing writer.
    races: Mutex<HashMap<String, u32>>,
    /// Workload keys whose updates are refused outright.
    rejects: Mutex<HashSet<String>>,
    pub fail_list: AtomicBool,
    pub fail_status: AtomicBool,
    pub updates: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: StateStore::open_in_memory().unwrap(),
            races: Mutex::new(HashMap::new()),
            rejects: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            updates: AtomicU32::new(0),
        }
    }

    /// Make the next `times` updates of `name` lose to another writer.
    pub fn race(&self, name: &str, times: u32) {
        self.races.lock().unwrap().insert(format!("{NS}/{name}"), times);
    }

    pub fn reject(&self, name: &str) {
        self.rejects.lock().unwrap().insert(format!("{NS}/{name}"));
    }

    pub fn add_record(&self, selector: &[(&str, &str)], interval: &str) -> RollingUpdate {
        let spec = DesiredState {
            selector: selector.iter().copied().collect::<LabelSelector>(),
            interval: interval.to_string(),
        };
        self.inner
            .put_record(&RollingUpdate::new(NS, RECORD, spec))
            .unwrap()
    }

    pub fn set_status(&self, status: ObservedState) {
        let current = self.record();
        self.inner.write_status(&current, &status).unwrap();
    }

    pub fn add_workload(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        let mut w = Workload::new(namespace, name);
        for (k, v) in labels {
            w = w.with_label(k, v);
        }
        self.inner.put_workload(&w).unwrap();
    }

    pub fn record(&self) -> RollingUpdate {
        self.inner
            .get_record(&record_ref().key())
            .unwrap()
            .unwrap()
    }

    pub fn status(&self) -> ObservedState {
        self.record().status
    }

    pub fn workload(&self, name: &str) -> Workload {
        self.workload_in(NS, name)
    }

    pub fn workload_in(&self, namespace: &str, name: &str) -> Workload {
        self.inner
            .get_workload(&format!("{namespace}/{name}"))
            .unwrap()
            .unwrap()
    }

    /// Simulate another controller touching the workload between our read
    /// and our write.
    fn interfere(&self, key: &str) {
        let pending = {
            let mut races = self.races.lock().unwrap();
            match races.get_mut(key) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if pending {
            let mut other = self.inner.get_workload(key).unwrap().unwrap();
            other.labels.insert("raced".to_string(), "yes".to_string());
            self.inner.put_workload(&other).unwrap();
        }
    }
}

impl WorkloadStore for FaultyStore {
    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a LabelSelector,
    ) -> StoreFuture<'a, Vec<Workload>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StoreError::Backend("list timed out".into())) });
        }
        self.inner.list(namespace, selector)
    }

    fn get<'a>(&'a self, reference: &'a WorkloadRef) -> StoreFuture<'a, Workload> {
        WorkloadStore::get(&self.inner, reference)
    }

    fn update<'a>(&'a self, workload: &'a Workload) -> StoreFuture<'a, Workload> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let key = workload.reference().key();
        if self.rejects.lock().unwrap().contains(&key) {
            return Box::pin(async move { Err(StoreError::Rejected(format!("{key}: forbidden"))) });
        }
        self.interfere(&key);
        self.inner.update(workload)
    }
}

impl RecordStore for FaultyStore {
    fn get_record<'a>(
        &'a self,
        reference: &'a RecordRef,
    ) -> StoreFuture<'a, Option<RollingUpdate>> {
        RecordStore::get_record(&self.inner, reference)
    }

    fn list_records(&self) -> StoreFuture<'_, Vec<RecordRef>> {
        RecordStore::list_records(&self.inner)
    }

    fn update_status<'a>(
        &'a self,
        record: &'a RollingUpdate,
        status: &'a ObservedState,
    ) -> StoreFuture<'a, ()> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StoreError::Backend("status write timed out".into())) });
        }
        self.inner.update_status(record, status)
    }
}

pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
    pub engine: RolloutEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_attempts(5)
    }

    pub fn with_attempts(attempts: u32) -> Self {
        let store = Arc::new(FaultyStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = EngineConfig {
            retry: RetryPolicy::immediate(attempts),
            ..EngineConfig::default()
        };
        let engine = RolloutEngine::new(store.clone(), store.clone(), clock.clone(), config);
        Self {
            store,
            clock,
            engine,
        }
    }
}
