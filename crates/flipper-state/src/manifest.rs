//! TOML manifests for seeding a standalone store.
//!
//! ```toml
//! [[records]]
//! namespace = "default"
//! name = "nightly"
//! spec = { matchLabels = { app = "web" }, interval = "24h" }
//!
//! [[workloads]]
//! namespace = "default"
//! name = "web"
//! labels = { app = "web" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use flipper_core::{Interval, RollingUpdate, Workload};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub records: Vec<RollingUpdate>,
    pub workloads: Vec<Workload>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> StateResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StateError::Manifest(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> StateResult<Self> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|e| StateError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject entries the store would accept but the engine never could.
    fn validate(&self) -> StateResult<()> {
        for record in &self.records {
            if record.namespace.is_empty() || record.name.is_empty() {
                return Err(StateError::Manifest("record without namespace/name".into()));
            }
            Interval::parse(&record.spec.interval).map_err(|e| {
                StateError::Manifest(format!("record {}: {e}", record.reference()))
            })?;
        }
        if self
            .workloads
            .iter()
            .any(|w| w.namespace.is_empty() || w.name.is_empty())
        {
            return Err(StateError::Manifest("workload without namespace/name".into()));
        }
        Ok(())
    }

    /// Upsert every record and workload into `store`. Record status and
    /// workload annotations already in the store are preserved.
    pub fn apply(&self, store: &StateStore) -> StateResult<()> {
        for record in &self.records {
            store.put_record(record)?;
        }
        for workload in &self.workloads {
            let mut next = workload.clone();
            if let Some(existing) = store.get_workload(&workload.reference().key())? {
                next.annotations = next.annotations.or(existing.annotations);
                next.template_annotations =
                    next.template_annotations.or(existing.template_annotations);
            }
            store.put_workload(&next)?;
        }
        info!(
            records = self.records.len(),
            workloads = self.workloads.len(),
            "manifest applied"
        );
        Ok(())
    }
}
