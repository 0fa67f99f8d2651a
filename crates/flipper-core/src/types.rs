//! Domain types shared across Flipper crates.
//!
//! A `RollingUpdate` record pairs a user-owned [`DesiredState`] with an
//! engine-owned [`ObservedState`]. A [`Workload`] is the engine's view of a
//! deployment-like object: just the metadata it reads and writes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::selector::LabelSelector;

/// Interval applied when a record does not set one.
pub const DEFAULT_INTERVAL: &str = "24h";

/// Namespaced name of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

/// Reference to a desired-state record.
pub type RecordRef = ObjectRef;

/// Reference to a workload.
pub type WorkloadRef = ObjectRef;

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Composite key used by stores: `{namespace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ── Records ────────────────────────────────────────────────────────

/// What the user asked for: which workloads, and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Required labels, ANDed. Empty matches every workload in the namespace.
    #[serde(rename = "matchLabels", default)]
    pub selector: LabelSelector,
    /// Raw interval string, parsed by the engine on every reconciliation.
    #[serde(default = "default_interval")]
    pub interval: String,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            selector: LabelSelector::default(),
            interval: default_interval(),
        }
    }
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

/// What the engine last did for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    /// `None` means the record has never rolled out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rollout_time: Option<DateTime<Utc>>,
    /// Sorted names touched by the most recent rollout.
    #[serde(rename = "deployments", default)]
    pub affected_workloads: Vec<String>,
}

/// A desired-state record together with its observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdate {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub spec: DesiredState,
    #[serde(default)]
    pub status: ObservedState,
    /// Write-version token; empty for records not read from a store.
    #[serde(default)]
    pub resource_version: String,
}

impl RollingUpdate {
    pub fn new(namespace: &str, name: &str, spec: DesiredState) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            spec,
            status: ObservedState::default(),
            resource_version: String::new(),
        }
    }

    pub fn reference(&self) -> RecordRef {
        ObjectRef::new(&self.namespace, &self.name)
    }
}

// ── Workloads ──────────────────────────────────────────────────────

/// The parts of a deployment-like object the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Object-level annotations. `None` when the object carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Pod-template annotations. Changing these replaces the pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_annotations: Option<BTreeMap<String, String>>,
    /// Write-version token checked by the store on update.
    #[serde(default)]
    pub resource_version: String,
}

impl Workload {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: BTreeMap::new(),
            annotations: None,
            template_annotations: None,
            resource_version: String::new(),
        }
    }

    /// Builder-style label setter, mostly for fixtures and manifests.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn reference(&self) -> WorkloadRef {
        ObjectRef::new(&self.namespace, &self.name)
    }

    /// Look up an object-level annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Look up a pod-template annotation.
    pub fn template_annotation(&self, key: &str) -> Option<&str> {
        self.template_annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ref_display_and_key_match() {
        let r = ObjectRef::new("default", "nightly");
        assert_eq!(r.to_string(), "default/nightly");
        assert_eq!(r.key(), "default/nightly");
    }

    #[test]
    fn desired_state_defaults_interval() {
        let spec: DesiredState = serde_json::from_str(r#"{"matchLabels":{"app":"web"}}"#).unwrap();
        assert_eq!(spec.interval, "24h");
        assert_eq!(spec.selector.get("app"), Some("web"));
    }

    #[test]
    fn observed_state_uses_wire_names() {
        let status = ObservedState {
            last_rollout_time: None,
            affected_workloads: vec!["d1".to_string()],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["deployments"][0], "d1");
        assert!(json.get("lastRolloutTime").is_none());
    }

    #[test]
    fn workload_annotation_lookup_handles_absent_maps() {
        let w = Workload::new("default", "api");
        assert_eq!(w.annotation("k"), None);
        assert_eq!(w.template_annotation("k"), None);
    }
}
