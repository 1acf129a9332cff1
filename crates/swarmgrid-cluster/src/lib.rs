//! swarmgrid-cluster: the cluster membership model for SwarmGrid.
//!
//! Materializes discovered addresses into [`Node`]s, tracks their
//! connection state, capacity and containers, and exposes the lookups the
//! scheduler and front ends need.
//!
//! # Architecture
//!
//! ```text
//! MembershipDelta ──► Cluster::apply_membership()
//!                       ├── removed → detach Node, ContainerUnreachable events
//!                       └── added   → spawn connect task
//!                                       ├── RuntimeClient::info()
//!                                       ├── RuntimeClient::list_containers()
//!                                       └── Connected → schedulable
//! Node ── RuntimeClient (DockerClient over HTTP) ── container host
//! ```

pub mod cluster;
pub mod container;
pub mod docker;
pub mod error;
pub mod events;
pub mod node;
pub mod runtime;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cluster::Cluster;
pub use container::Container;
pub use docker::DockerClient;
pub use error::{ClusterError, ClusterResult, RuntimeError, RuntimeResult};
pub use events::{ClusterEvent, EventHandler};
pub use node::{Node, NodeState, NodeView};
pub use runtime::{ContainerHandle, ContainerSummary, EngineInfo, RuntimeClient};
