//! The `RollingUpdate` custom resource and its mapping onto core types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use flipper_core::{DEFAULT_INTERVAL, DesiredState, LabelSelector, ObservedState, Workload};

pub const GROUP: &str = "flipper.example.com";
pub const VERSION: &str = "v1alpha1";

/// Desired state of a `RollingUpdate`.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "flipper.example.com",
    version = "v1alpha1",
    kind = "RollingUpdate",
    plural = "rollingupdates",
    shortname = "ru",
    namespaced,
    status = "RollingUpdateStatus",
    printcolumn = r#"{"name":"Interval","type":"string","jsonPath":".spec.interval"}"#,
    printcolumn = r#"{"name":"Last Rollout","type":"date","jsonPath":".status.lastRolloutTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateSpec {
    /// Labels a Deployment must carry, ANDed. Empty selects every
    /// Deployment in the namespace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Time between rollouts, e.g. `30m`, `12h`, `1w`.
    #[serde(default = "default_interval")]
    #[schemars(regex(pattern = r"^[0-9]+(m|h|d|w)?$"))]
    pub interval: String,
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

impl Default for RollingUpdateSpec {
    fn default() -> Self {
        Self {
            match_labels: BTreeMap::new(),
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateStatus {
    /// Absent until the first rollout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rollout_time: Option<DateTime<Utc>>,

    /// Deployments restarted by the most recent rollout, by name. They live
    /// in the resource's own namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<String>,
}

impl From<&RollingUpdateSpec> for DesiredState {
    fn from(spec: &RollingUpdateSpec) -> Self {
        Self {
            selector: LabelSelector::from(spec.match_labels.clone()),
            interval: spec.interval.clone(),
        }
    }
}

impl From<&RollingUpdateStatus> for ObservedState {
    fn from(status: &RollingUpdateStatus) -> Self {
        Self {
            last_rollout_time: status.last_rollout_time,
            affected_workloads: status.deployments.clone(),
        }
    }
}

impl From<&RollingUpdate> for flipper_core::RollingUpdate {
    fn from(resource: &RollingUpdate) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
            spec: DesiredState::from(&resource.spec),
            status: resource
                .status
                .as_ref()
                .map(ObservedState::from)
                .unwrap_or_default(),
            resource_version: resource.resource_version().unwrap_or_default(),
        }
    }
}

/// The engine's view of a Deployment.
pub fn workload_from_deployment(deployment: &Deployment) -> Workload {
    let template_annotations = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.annotations.clone());

    Workload {
        namespace: deployment.namespace().unwrap_or_default(),
        name: deployment.name_any(),
        labels: deployment.metadata.labels.clone().unwrap_or_default(),
        annotations: deployment.metadata.annotations.clone(),
        template_annotations,
        resource_version: deployment.resource_version().unwrap_or_default(),
    }
}
