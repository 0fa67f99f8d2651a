//! flipper-state: embedded store for standalone Flipper.
//!
//! Backed by [redb](https://docs.rs/redb), holds `RollingUpdate` records
//! and the workloads they restart. Used by `flipperd standalone` and as
//! the store behind engine and scheduler tests (in-memory backend).
//!
//! # Architecture
//!
//! Records and workloads are JSON-serialized into redb's `&[u8]` value
//! columns under `{namespace}/{name}` keys. Each object carries a
//! monotonically increasing version, exposed as its `resource_version`
//! token. Guarded writes compare that token inside the write transaction
//! and fail with [`StateError::Conflict`] on mismatch, which the store
//! traits surface as a version conflict.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod backend;
pub mod error;
pub mod manifest;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use manifest::Manifest;
pub use store::StateStore;
