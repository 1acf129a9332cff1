//! Node and container lifecycle notifications.

use crate::container::Container;

/// Something that happened to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A node connected and joined the schedulable set.
    NodeAdded { node: String },
    /// A discovered node could not be connected.
    NodeFailed { node: String, error: String },
    /// A node left the membership and was detached.
    NodeRemoved { node: String },
    ContainerCreated { container: Container },
    ContainerRemoved { container: Container },
    /// The container's node left; its fate is unknown.
    ContainerUnreachable { container: Container },
}

impl ClusterEvent {
    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::NodeAdded { .. } => "node_added",
            ClusterEvent::NodeFailed { .. } => "node_failed",
            ClusterEvent::NodeRemoved { .. } => "node_removed",
            ClusterEvent::ContainerCreated { .. } => "container_created",
            ClusterEvent::ContainerRemoved { .. } => "container_removed",
            ClusterEvent::ContainerUnreachable { .. } => "container_unreachable",
        }
    }
}

/// Receives cluster events. Handlers run inline and must not block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ClusterEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&ClusterEvent) + Send + Sync,
{
    fn handle(&self, event: &ClusterEvent) {
        self(event)
    }
}
