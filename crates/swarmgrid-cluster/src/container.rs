//! Containers as the cluster sees them.

use serde::Serialize;

use swarmgrid_state::{ContainerConfig, ContainerId, ContainerRecord, NodeId};

/// A container placed on (or adopted from) a node.
///
/// The owning node is referenced by id only; look it up through the
/// cluster when needed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub config: ContainerConfig,
    pub node_id: NodeId,
    /// True once the container's record has been committed to the store.
    pub persisted: bool,
}

impl Container {
    /// The store row for this container.
    pub fn to_record(&self, created_at: u64) -> ContainerRecord {
        ContainerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            node_id: self.node_id.clone(),
            config: self.config.clone(),
            created_at,
        }
    }

    /// Match by exact id or exact name.
    pub fn matches(&self, id_or_name: &str) -> bool {
        self.id == id_or_name || (!self.name.is_empty() && self.name == id_or_name)
    }
}
