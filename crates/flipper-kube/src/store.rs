//! Store traits over the Kubernetes API.
//!
//! Writes are JSON merge patches that carry `metadata.resourceVersion`.
//! The API server treats that as a precondition and answers 409 when the
//! object moved on; the writer retries on that conflict.

use chrono::SecondsFormat;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{Map, Value, json};
use tracing::debug;

use flipper_core::{
    LabelSelector, ObjectRef, ObservedState, RecordRef, RecordStore, StoreError, StoreFuture,
    Workload, WorkloadRef, WorkloadStore,
};

use crate::crd::{RollingUpdate, workload_from_deployment};

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    /// Restrict record listing to one namespace. `None` lists cluster-wide.
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    /// Connect using the in-cluster config or the local kubeconfig.
    pub async fn try_default(namespace: Option<String>) -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn records_in(&self, namespace: &str) -> Api<RollingUpdate> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// The record API covering every namespace this store manages.
    pub fn records(&self) -> Api<RollingUpdate> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

impl WorkloadStore for KubeStore {
    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a LabelSelector,
    ) -> StoreFuture<'a, Vec<Workload>> {
        Box::pin(async move {
            let mut params = ListParams::default();
            if !selector.is_empty() {
                params = params.labels(&selector.to_string());
            }
            let list = self
                .deployments(namespace)
                .list(&params)
                .await
                .map_err(|e| map_api_error(e, namespace))?;
            Ok(list.items.iter().map(workload_from_deployment).collect())
        })
    }

    fn get<'a>(&'a self, reference: &'a WorkloadRef) -> StoreFuture<'a, Workload> {
        Box::pin(async move {
            let deployment = self
                .deployments(&reference.namespace)
                .get(&reference.name)
                .await
                .map_err(|e| map_api_error(e, &reference.key()))?;
            Ok(workload_from_deployment(&deployment))
        })
    }

    fn update<'a>(&'a self, workload: &'a Workload) -> StoreFuture<'a, Workload> {
        Box::pin(async move {
            let key = workload.reference().key();
            let patch = annotation_patch(workload);
            let patched = self
                .deployments(&workload.namespace)
                .patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| map_api_error(e, &key))?;
            debug!(
                workload = %key,
                version = %patched.resource_version().unwrap_or_default(),
                "deployment patched"
            );
            Ok(workload_from_deployment(&patched))
        })
    }
}

impl RecordStore for KubeStore {
    fn get_record<'a>(
        &'a self,
        reference: &'a RecordRef,
    ) -> StoreFuture<'a, Option<flipper_core::RollingUpdate>> {
        Box::pin(async move {
            let found = self
                .records_in(&reference.namespace)
                .get_opt(&reference.name)
                .await
                .map_err(|e| map_api_error(e, &reference.key()))?;
            Ok(found.as_ref().map(flipper_core::RollingUpdate::from))
        })
    }

    fn list_records(&self) -> StoreFuture<'_, Vec<RecordRef>> {
        Box::pin(async move {
            let list = self
                .records()
                .list(&ListParams::default())
                .await
                .map_err(|e| map_api_error(e, "rollingupdates"))?;
            Ok(list.items.iter().map(record_ref).collect())
        })
    }

    fn update_status<'a>(
        &'a self,
        record: &'a flipper_core::RollingUpdate,
        status: &'a ObservedState,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let key = record.reference().key();
            let patch = status_patch(&record.resource_version, status);
            self.records_in(&record.namespace)
                .patch_status(&record.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| map_api_error(e, &key))?;
            Ok(())
        })
    }
}

pub fn record_ref(resource: &RollingUpdate) -> RecordRef {
    ObjectRef::new(resource.namespace().unwrap_or_default(), resource.name_any())
}

/// Classify an API failure the way the engine needs it.
pub fn map_api_error(err: kube::Error, what: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            409 => StoreError::Conflict(what.to_string()),
            404 => StoreError::NotFound(what.to_string()),
            400 | 403 | 422 => StoreError::Rejected(format!("{what}: {}", resp.message)),
            _ => StoreError::Backend(format!("{what}: {} ({})", resp.message, resp.code)),
        },
        other => StoreError::Backend(format!("{what}: {other}")),
    }
}

fn version_precondition(resource_version: &str) -> Value {
    let mut metadata = Map::new();
    if !resource_version.is_empty() {
        metadata.insert("resourceVersion".into(), json!(resource_version));
    }
    Value::Object(metadata)
}

/// Merge patch writing both annotation maps of a Deployment.
pub fn annotation_patch(workload: &Workload) -> Value {
    let mut metadata = version_precondition(&workload.resource_version);
    if let (Value::Object(meta), Some(annotations)) = (&mut metadata, &workload.annotations) {
        meta.insert("annotations".into(), json!(annotations));
    }
    let template = workload
        .template_annotations
        .as_ref()
        .map(|a| json!({ "template": { "metadata": { "annotations": a } } }))
        .unwrap_or_else(|| json!({}));
    json!({ "metadata": metadata, "spec": template })
}

/// Merge patch replacing the status subresource. An empty deployment list
/// is sent as `null` so the field is cleared rather than left stale.
pub fn status_patch(resource_version: &str, status: &ObservedState) -> Value {
    let last = status
        .last_rollout_time
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
    let deployments = if status.affected_workloads.is_empty() {
        Value::Null
    } else {
        json!(status.affected_workloads)
    };
    json!({
        "metadata": version_precondition(resource_version),
        "status": {
            "lastRolloutTime": last,
            "deployments": deployments,
        }
    })
}
