//! redb table definitions for the nodescale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Scaling specs keyed by spec name.
pub const AUTOSCALERS: TableDefinition<&str, &[u8]> = TableDefinition::new("autoscalers");

/// Published reconciler status keyed by spec name.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");

/// Last successful bootstrap keyed by cluster name.
pub const BOOTSTRAP: TableDefinition<&str, &[u8]> = TableDefinition::new("bootstrap");
