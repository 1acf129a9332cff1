//! A cluster member: connection state, capacity and owned containers.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!       ▲                          │
//!       └──── disconnect() ◄── Error ◄──err──┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use swarmgrid_state::{ContainerConfig, ContainerId, NodeId};

use crate::container::Container;
use crate::error::{ClusterError, ClusterResult};
use crate::runtime::RuntimeClient;

/// Connection state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Disconnected => f.write_str("disconnected"),
            NodeState::Connecting => f.write_str("connecting"),
            NodeState::Connected => f.write_str("connected"),
            NodeState::Error => f.write_str("error"),
        }
    }
}

/// Point-in-time copy of a node, handed to filters and strategies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub addr: String,
    pub name: String,
    pub state: NodeState,
    pub labels: BTreeMap<String, String>,
    pub cpus: f64,
    pub memory_bytes: u64,
    pub overcommit_ratio: f64,
    pub containers: Vec<Container>,
}

impl NodeView {
    /// CPUs available for reservation after overcommit.
    pub fn usable_cpus(&self) -> f64 {
        self.cpus * (1.0 + self.overcommit_ratio)
    }

    /// Memory available for reservation after overcommit.
    pub fn usable_memory(&self) -> u64 {
        (self.memory_bytes as f64 * (1.0 + self.overcommit_ratio)) as u64
    }

    pub fn reserved_cpus(&self) -> f64 {
        self.containers.iter().map(|c| c.config.cpus).sum()
    }

    /// Memory reserved by owned containers, saturating at `u64::MAX`.
    pub fn reserved_memory(&self) -> u64 {
        self.containers
            .iter()
            .fold(0u64, |total, c| total.saturating_add(c.config.memory_bytes))
    }

    /// Reserved memory if `config` were placed here; `None` on overflow.
    pub fn projected_memory(&self, config: &ContainerConfig) -> Option<u64> {
        self.containers
            .iter()
            .map(|c| c.config.memory_bytes)
            .try_fold(config.memory_bytes, |total, m| total.checked_add(m))
    }

    /// Whether `config`'s reservation fits in the remaining capacity.
    pub fn fits(&self, config: &ContainerConfig) -> bool {
        self.reserved_cpus() + config.cpus <= self.usable_cpus()
            && self
                .projected_memory(config)
                .is_some_and(|m| m <= self.usable_memory())
    }
}

#[derive(Debug)]
struct NodeInner {
    state: NodeState,
    name: String,
    labels: BTreeMap<String, String>,
    cpus: f64,
    memory_bytes: u64,
    containers: HashMap<ContainerId, Container>,
}

/// One container host, identified by its `host:port` address.
pub struct Node {
    id: NodeId,
    client: Arc<dyn RuntimeClient>,
    overcommit_ratio: f64,
    inner: RwLock<NodeInner>,
}

impl Node {
    /// A disconnected node. Negative overcommit ratios are clamped to zero.
    pub fn new(addr: &str, client: Arc<dyn RuntimeClient>, overcommit_ratio: f64) -> Self {
        Self {
            id: addr.to_string(),
            client,
            overcommit_ratio: overcommit_ratio.max(0.0),
            inner: RwLock::new(NodeInner {
                state: NodeState::Disconnected,
                name: String::new(),
                labels: BTreeMap::new(),
                cpus: 0.0,
                memory_bytes: 0,
                containers: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The node's address; same as its id.
    pub fn addr(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> NodeState {
        self.inner.read().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == NodeState::Connected
    }

    /// Query the runtime for capacity and existing containers.
    ///
    /// Leaves the node `Connected` on success and in `Error` on failure.
    pub async fn connect(&self) -> ClusterResult<()> {
        self.inner.write().await.state = NodeState::Connecting;
        debug!(node = %self.id, "connecting");

        let result = async {
            let info = self.client.info(&self.id).await?;
            let existing = self.client.list_containers(&self.id).await?;
            Ok::<_, ClusterError>((info, existing))
        }
        .await;

        let mut inner = self.inner.write().await;
        match result {
            Ok((info, existing)) => {
                inner.name = info.name;
                inner.labels = info.labels;
                inner.cpus = info.cpus;
                inner.memory_bytes = info.memory_bytes;
                inner.containers = existing
                    .into_iter()
                    .map(|summary| {
                        let container = Container {
                            id: summary.id.clone(),
                            name: summary.name.clone(),
                            config: summary.to_config(),
                            node_id: self.id.clone(),
                            persisted: false,
                        };
                        (summary.id, container)
                    })
                    .collect();
                inner.state = NodeState::Connected;
                info!(
                    node = %self.id,
                    name = %inner.name,
                    cpus = inner.cpus,
                    memory_bytes = inner.memory_bytes,
                    containers = inner.containers.len(),
                    "node connected"
                );
                Ok(())
            }
            Err(e) => {
                inner.state = NodeState::Error;
                warn!(node = %self.id, error = %e, "node connection failed");
                Err(e)
            }
        }
    }

    /// Return to `Disconnected`, forgetting what the runtime reported.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        inner.state = NodeState::Disconnected;
        inner.containers.clear();
    }

    /// Create a container on this node and record it as owned.
    pub async fn create(&self, config: &ContainerConfig, name: &str) -> ClusterResult<Container> {
        if !self.is_connected().await {
            return Err(ClusterError::NodeNotConnected(self.id.clone()));
        }

        let handle = self.client.create_container(&self.id, config, name).await?;
        let container = Container {
            id: handle.id,
            name: handle.name,
            config: config.clone(),
            node_id: self.id.clone(),
            persisted: false,
        };

        self.inner
            .write()
            .await
            .containers
            .insert(container.id.clone(), container.clone());
        debug!(node = %self.id, container = %container.id, "container created");
        Ok(container)
    }

    /// Destroy an owned container and forget it.
    pub async fn destroy(&self, id: &str, force: bool) -> ClusterResult<Container> {
        if !self.inner.read().await.containers.contains_key(id) {
            return Err(ClusterError::ContainerNotFound {
                node: self.id.clone(),
                container: id.to_string(),
            });
        }

        self.client.destroy_container(&self.id, id, force).await?;

        let removed = self.inner.write().await.containers.remove(id);
        debug!(node = %self.id, container = %id, "container destroyed");
        removed.ok_or_else(|| ClusterError::ContainerNotFound {
            node: self.id.clone(),
            container: id.to_string(),
        })
    }

    /// Flag a container's record as committed.
    pub async fn mark_persisted(&self, id: &str) -> bool {
        match self.inner.write().await.containers.get_mut(id) {
            Some(c) => {
                c.persisted = true;
                true
            }
            None => false,
        }
    }

    pub async fn container(&self, id: &str) -> Option<Container> {
        self.inner.read().await.containers.get(id).cloned()
    }

    /// Owned containers, sorted by id.
    pub async fn containers(&self) -> Vec<Container> {
        let mut containers: Vec<Container> =
            self.inner.read().await.containers.values().cloned().collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        containers
    }

    pub async fn view(&self) -> NodeView {
        let inner = self.inner.read().await;
        let mut containers: Vec<Container> = inner.containers.values().cloned().collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        NodeView {
            id: self.id.clone(),
            addr: self.id.clone(),
            name: inner.name.clone(),
            state: inner.state,
            labels: inner.labels.clone(),
            cpus: inner.cpus,
            memory_bytes: inner.memory_bytes,
            overcommit_ratio: self.overcommit_ratio,
            containers,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("overcommit_ratio", &self.overcommit_ratio)
            .finish_non_exhaustive()
    }
}
