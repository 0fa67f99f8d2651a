//! redb table definitions for the Flipper state store.
//!
//! Both tables use `{namespace}/{name}` keys and `&[u8]` values
//! (JSON-serialized domain types).

use redb::TableDefinition;

/// `RollingUpdate` records (spec + status).
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Deployment-like workloads.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");
