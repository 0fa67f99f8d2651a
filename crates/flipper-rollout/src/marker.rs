//! Restart marker annotations.
//!
//! Writing the marker into the pod-template annotations is what makes the
//! workload controller replace its pods; the same keys on the object itself
//! record who restarted it and why. The key names are wire-visible and
//! match what `kubectl rollout restart` and existing verification tooling
//! look for.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use flipper_core::Workload;

/// RFC3339 time of the restart.
pub const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";
/// Identity of the controller that restarted the workload.
pub const RESTARTED_BY: &str = "kubectl.kubernetes.io/restartedBy";
/// `<namespace>/<name>` of the record that asked for the restart.
pub const RESTARTED_BY_RECORD: &str = "flipper.example.com/restartedByCR";
/// Kind of that record.
pub const RESTARTED_BY_RECORD_KIND: &str = "flipper.example.com/restartedByCRDKind";

/// The four annotations that prove and timestamp a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutMarker {
    pub triggered_at: DateTime<Utc>,
    pub triggered_by: String,
    pub source_record: String,
    pub source_kind: String,
}

impl RolloutMarker {
    pub fn new(
        triggered_at: DateTime<Utc>,
        triggered_by: &str,
        source_record: &str,
        source_kind: &str,
    ) -> Self {
        Self {
            triggered_at,
            triggered_by: triggered_by.to_string(),
            source_record: source_record.to_string(),
            source_kind: source_kind.to_string(),
        }
    }

    /// The marker as annotation key/value pairs.
    pub fn annotations(&self) -> [(&'static str, String); 4] {
        [
            (
                RESTARTED_AT,
                self.triggered_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (RESTARTED_BY, self.triggered_by.clone()),
            (RESTARTED_BY_RECORD, self.source_record.clone()),
            (RESTARTED_BY_RECORD_KIND, self.source_kind.clone()),
        ]
    }

    /// Write the marker into both annotation maps, creating them if absent.
    /// Existing marker keys are overwritten; other keys are left alone.
    pub fn apply_to(&self, workload: &mut Workload) {
        let pairs = self.annotations();
        merge(workload.annotations.get_or_insert_with(BTreeMap::new), &pairs);
        merge(
            workload.template_annotations.get_or_insert_with(BTreeMap::new),
            &pairs,
        );
    }
}

fn merge(target: &mut BTreeMap<String, String>, pairs: &[(&'static str, String)]) {
    for (key, value) in pairs {
        target.insert((*key).to_string(), value.clone());
    }
}

/// Pure form of [`RolloutMarker::apply_to`].
pub fn apply_marker(mut workload: Workload, marker: &RolloutMarker) -> Workload {
    marker.apply_to(&mut workload);
    workload
}
