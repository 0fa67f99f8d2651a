//! flipper-core: shared types for the Flipper restart controller.
//!
//! Everything the reconciliation engine and its backends agree on lives
//! here: the desired/observed state of a `RollingUpdate` record, the
//! workload view the engine mutates, label selectors, interval parsing,
//! the async store traits, the clock seam, and cancellation.

pub mod clock;
pub mod config;
pub mod interval;
pub mod selector;
pub mod shutdown;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ControllerConfig};
pub use interval::{Interval, IntervalError};
pub use selector::LabelSelector;
pub use shutdown::{Cancelled, Shutdown};
pub use store::{RecordStore, StoreError, StoreFuture, StoreResult, WorkloadStore};
pub use types::*;
