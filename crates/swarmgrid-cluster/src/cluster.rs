//! The cluster aggregate: every connected node and, through them, every
//! container.
//!
//! Membership deltas add and remove nodes; the scheduler adds and removes
//! containers. Nothing else mutates cluster state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use swarmgrid_discovery::MembershipDelta;
use swarmgrid_state::NodeId;

use crate::container::Container;
use crate::events::{ClusterEvent, EventHandler};
use crate::node::{Node, NodeState, NodeView};
use crate::runtime::RuntimeClient;

#[derive(Default)]
struct Members {
    /// Connected nodes.
    nodes: HashMap<NodeId, Arc<Node>>,
    /// Addresses with a connect attempt in flight, and that attempt's
    /// generation. A removal drops the entry so the attempt is discarded.
    pending: HashMap<NodeId, u64>,
}

/// All nodes in the scheduling domain.
pub struct Cluster {
    client: Arc<dyn RuntimeClient>,
    overcommit_ratio: f64,
    members: RwLock<Members>,
    generation: AtomicU64,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl Cluster {
    pub fn new(client: Arc<dyn RuntimeClient>, overcommit_ratio: f64) -> Self {
        Self {
            client,
            overcommit_ratio: overcommit_ratio.max(0.0),
            members: RwLock::new(Members::default()),
            generation: AtomicU64::new(0),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn overcommit_ratio(&self) -> f64 {
        self.overcommit_ratio
    }

    /// Register a handler for node and container lifecycle events.
    pub async fn subscribe<H: EventHandler + 'static>(&self, handler: H) {
        self.handlers.write().await.push(Arc::new(handler));
    }

    /// Deliver `event` to every subscriber.
    pub async fn emit(&self, event: ClusterEvent) {
        debug!(event = event.kind(), "cluster event");
        for handler in self.handlers.read().await.iter() {
            handler.handle(&event);
        }
    }

    /// Apply a discovery delta: detach removed nodes, start connecting
    /// added ones.
    ///
    /// Returns the spawned connect tasks.
    pub async fn apply_membership(self: &Arc<Self>, delta: &MembershipDelta) -> Vec<JoinHandle<()>> {
        for addr in &delta.removed {
            self.remove_node(addr).await;
        }
        let mut tasks = Vec::with_capacity(delta.added.len());
        for addr in &delta.added {
            if let Some(task) = self.add_node(addr).await {
                tasks.push(task);
            }
        }
        tasks
    }

    /// Consume membership deltas until the stream closes.
    pub async fn run(self: Arc<Self>, mut deltas: mpsc::Receiver<MembershipDelta>) {
        while let Some(delta) = deltas.recv().await {
            info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                "applying membership change"
            );
            self.apply_membership(&delta).await;
        }
        debug!("membership stream closed");
    }

    /// Start an asynchronous connect for `addr`.
    ///
    /// Returns `None` if the node is already connected or connecting.
    pub async fn add_node(self: &Arc<Self>, addr: &str) -> Option<JoinHandle<()>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut members = self.members.write().await;
            if members.nodes.contains_key(addr) || members.pending.contains_key(addr) {
                debug!(node = %addr, "node already known");
                return None;
            }
            members.pending.insert(addr.to_string(), generation);
        }

        let cluster = Arc::clone(self);
        let addr = addr.to_string();
        Some(tokio::spawn(async move {
            cluster.connect(addr, generation).await;
        }))
    }

    async fn connect(&self, addr: String, generation: u64) {
        let node = Arc::new(Node::new(&addr, Arc::clone(&self.client), self.overcommit_ratio));
        let result = node.connect().await;

        let wanted = {
            let mut members = self.members.write().await;
            let wanted = members.pending.get(&addr) == Some(&generation);
            if wanted {
                members.pending.remove(&addr);
                if result.is_ok() {
                    members.nodes.insert(addr.clone(), Arc::clone(&node));
                }
            }
            wanted
        };

        match result {
            Ok(()) if wanted => {
                info!(node = %addr, "node joined cluster");
                self.emit(ClusterEvent::NodeAdded { node: addr }).await;
            }
            Ok(()) => {
                debug!(node = %addr, "node left membership while connecting, discarding");
                node.disconnect().await;
            }
            Err(e) => {
                node.disconnect().await;
                if wanted {
                    self.emit(ClusterEvent::NodeFailed {
                        node: addr,
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    /// Detach a node and report its containers unreachable.
    ///
    /// Also cancels a pending connect. Returns true if anything was known
    /// about `addr`.
    pub async fn remove_node(&self, addr: &str) -> bool {
        let (node, was_pending) = {
            let mut members = self.members.write().await;
            let was_pending = members.pending.remove(addr).is_some();
            (members.nodes.remove(addr), was_pending)
        };

        let Some(node) = node else {
            if was_pending {
                debug!(node = %addr, "cancelled pending connect");
            }
            return was_pending;
        };

        let orphaned = node.containers().await;
        node.disconnect().await;
        warn!(node = %addr, containers = orphaned.len(), "node removed from cluster");

        self.emit(ClusterEvent::NodeRemoved {
            node: addr.to_string(),
        })
        .await;
        for container in orphaned {
            self.emit(ClusterEvent::ContainerUnreachable { container }).await;
        }
        true
    }

    pub async fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.members.read().await.nodes.get(id).cloned()
    }

    async fn node_handles(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.members.read().await.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Snapshot of every node, sorted by id.
    pub async fn nodes(&self) -> Vec<NodeView> {
        let mut views = Vec::new();
        for node in self.node_handles().await {
            views.push(node.view().await);
        }
        views
    }

    /// Connected nodes eligible for placement.
    pub async fn candidates(&self) -> Vec<NodeView> {
        self.nodes()
            .await
            .into_iter()
            .filter(|n| n.state == NodeState::Connected)
            .collect()
    }

    /// Addresses with a connect attempt in flight, sorted.
    pub async fn pending(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.members.read().await.pending.keys().cloned().collect();
        pending.sort();
        pending
    }

    /// Every container on every node, sorted by id.
    pub async fn containers(&self) -> Vec<Container> {
        let mut all = Vec::new();
        for node in self.node_handles().await {
            all.extend(node.containers().await);
        }
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Look up a container by exact id, exact name, or unique id prefix.
    pub async fn container(&self, id_or_name: &str) -> Option<Container> {
        if id_or_name.is_empty() {
            return None;
        }
        let all = self.containers().await;

        if let Some(c) = all.iter().find(|c| c.id == id_or_name) {
            return Some(c.clone());
        }
        if let Some(c) = all.iter().find(|c| c.matches(id_or_name)) {
            return Some(c.clone());
        }

        let mut prefixed = all.into_iter().filter(|c| c.id.starts_with(id_or_name));
        match (prefixed.next(), prefixed.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}
