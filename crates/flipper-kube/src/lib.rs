//! flipper-kube: Kubernetes backend for the Flipper controller.
//!
//! Defines the `RollingUpdate` custom resource (`flipper.example.com/v1alpha1`)
//! and implements the core store traits over `apps/v1` Deployments and that
//! resource, plus a watch that reports record changes.

pub mod crd;
pub mod store;
pub mod watch;

pub use crd::{RollingUpdate, RollingUpdateSpec, RollingUpdateStatus, workload_from_deployment};
pub use store::{KubeStore, map_api_error};
pub use watch::watch_records;
