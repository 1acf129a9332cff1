//! redb table definitions for the SwarmGrid state store.

use redb::TableDefinition;

/// Container records keyed by container ID.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");
