//! Scheduler: places containers on cluster nodes.
//!
//! `create_container` and `remove_container` are serialized behind one
//! mutex that is held across the runtime round trip, so two placements
//! never see the same free capacity.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use swarmgrid_cluster::{Cluster, ClusterEvent, Container};
use swarmgrid_state::ContainerConfig;

use crate::error::{SchedulerError, SchedulerResult, StrategyError};
use crate::filter::FilterChain;
use crate::store::ContainerStore;
use crate::strategy::Strategy;

/// Filter chain + strategy + store, applied to a shared cluster.
pub struct Scheduler {
    cluster: Arc<Cluster>,
    filters: FilterChain,
    strategy: Box<dyn Strategy>,
    store: Arc<dyn ContainerStore>,
    lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        cluster: Arc<Cluster>,
        filters: FilterChain,
        strategy: Box<dyn Strategy>,
        store: Arc<dyn ContainerStore>,
    ) -> Self {
        Self {
            cluster,
            filters,
            strategy,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.names()
    }

    /// Pick a node for `config`, create the container there and record it.
    ///
    /// If the runtime create succeeds but the store commit fails, the
    /// container stays on the node and a `Consistency` error is returned.
    pub async fn create_container(&self, config: &ContainerConfig, name: &str) -> SchedulerResult<Container> {
        let _guard = self.lock.lock().await;

        let candidates = self.cluster.candidates().await;
        let total = candidates.len();
        let nodes = self.filters.apply(config, candidates)?;
        if nodes.is_empty() {
            return Err(SchedulerError::NoCandidate(format!(
                "all {total} candidate node(s) were filtered out"
            )));
        }

        let node_id = self
            .strategy
            .place(name, config, &nodes)
            .map_err(|e| match e {
                StrategyError::NoFit => SchedulerError::NoCandidate(format!(
                    "none of {} node(s) can fit the requested resources",
                    nodes.len()
                )),
                other => SchedulerError::NoCandidate(other.to_string()),
            })?;
        debug!(strategy = self.strategy.name(), node = %node_id, "node selected");

        let node = self
            .cluster
            .node(&node_id)
            .await
            .ok_or_else(|| SchedulerError::NodeUnavailable(node_id.clone()))?;

        let mut container = node.create(config, name).await?;

        // The node may have left the cluster during the runtime round trip.
        let still_member = self
            .cluster
            .node(&node_id)
            .await
            .is_some_and(|current| Arc::ptr_eq(&current, &node));
        if !still_member {
            warn!(node = %node_id, container = %container.id, "node left during create, not recording");
            self.cluster
                .emit(ClusterEvent::ContainerUnreachable {
                    container: container.clone(),
                })
                .await;
            return Err(SchedulerError::NodeUnavailable(node_id));
        }

        if let Err(e) = self.store.commit(&container.to_record(epoch_secs())) {
            error!(
                consistency = true,
                node = %node_id,
                container = %container.id,
                error = %e,
                "container created but not recorded"
            );
            return Err(SchedulerError::Consistency {
                operation: "create",
                container: container.id,
                node: node_id,
                source: e,
            });
        }

        node.mark_persisted(&container.id).await;
        container.persisted = true;
        info!(node = %node_id, container = %container.id, image = %config.image, "container scheduled");

        self.cluster
            .emit(ClusterEvent::ContainerCreated {
                container: container.clone(),
            })
            .await;
        Ok(container)
    }

    /// Destroy a container on its node and drop its record.
    ///
    /// Containers that were never recorded (adopted from the node at
    /// connect time) skip the store.
    pub async fn remove_container(&self, container: &Container, force: bool) -> SchedulerResult<()> {
        let _guard = self.lock.lock().await;

        let node = self
            .cluster
            .node(&container.node_id)
            .await
            .ok_or_else(|| SchedulerError::NodeUnavailable(container.node_id.clone()))?;

        let persisted = node
            .container(&container.id)
            .await
            .map(|c| c.persisted)
            .unwrap_or(container.persisted);

        let removed = node.destroy(&container.id, force).await.inspect_err(|e| {
            warn!(node = %container.node_id, container = %container.id, error = %e, "destroy failed");
        })?;

        if persisted {
            if let Err(e) = self.store.remove(&container.id, force) {
                error!(
                    consistency = true,
                    node = %container.node_id,
                    container = %container.id,
                    error = %e,
                    "container destroyed but record not removed"
                );
                return Err(SchedulerError::Consistency {
                    operation: "remove",
                    container: container.id.clone(),
                    node: container.node_id.clone(),
                    source: e,
                });
            }
        }

        info!(node = %container.node_id, container = %container.id, "container removed");
        self.cluster
            .emit(ClusterEvent::ContainerRemoved { container: removed })
            .await;
        Ok(())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use swarmgrid_cluster::ClusterError;
    use swarmgrid_cluster::testing::MockRuntime;
    use swarmgrid_discovery::MembershipDelta;
    use swarmgrid_state::{ContainerRecord, StateError, StateResult, StateStore};

    use crate::strategy::{BinpackStrategy, SpreadStrategy};

    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;

    /// A store whose writes always fail.
    struct BrokenStore;

    impl ContainerStore for BrokenStore {
        fn commit(&self, _record: &ContainerRecord) -> StateResult<()> {
            Err(StateError::Write("disk full".to_string()))
        }

        fn remove(&self, _id: &str, _force: bool) -> StateResult<()> {
            Err(StateError::Write("disk full".to_string()))
        }
    }

    async fn cluster_with(runtime: &Arc<MockRuntime>, nodes: &[&str], overcommit: f64) -> Arc<Cluster> {
        let cluster = Arc::new(Cluster::new(runtime.clone(), overcommit));
        let delta = MembershipDelta {
            added: nodes.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            removed: BTreeSet::new(),
        };
        for task in cluster.apply_membership(&delta).await {
            task.await.unwrap();
        }
        cluster
    }

    fn scheduler(cluster: Arc<Cluster>, store: Arc<dyn ContainerStore>) -> Scheduler {
        Scheduler::new(
            cluster,
            FilterChain::from_names(&["health", "constraint", "affinity", "port"]).unwrap(),
            Box::new(SpreadStrategy),
            store,
        )
    }

    #[tokio::test]
    async fn places_and_records_container() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = scheduler(cluster.clone(), store.clone());

        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cluster
            .subscribe(move |e: &ClusterEvent| sink.lock().unwrap().push(e.kind()))
            .await;

        let container = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap();

        assert_eq!(container.node_id, "10.0.0.1:2375");
        assert!(container.persisted);
        let record = store.get_container(&container.id).unwrap().unwrap();
        assert_eq!(record.name, "c1");
        assert_eq!(record.node_id, "10.0.0.1:2375");
        assert_eq!(runtime.containers_on("10.0.0.1:2375").await, vec!["c1"]);
        assert_eq!(cluster.container("c1").await.unwrap(), container);
        assert_eq!(*events.lock().unwrap(), vec!["container_created"]);
    }

    #[tokio::test]
    async fn all_nodes_filtered_out() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        runtime.add_host("10.0.0.2:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375", "10.0.0.2:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = scheduler(cluster, store.clone());

        let config = ContainerConfig::new("busybox").with_constraint("region==mars");
        let err = scheduler.create_container(&config, "c1").await.unwrap_err();

        assert!(matches!(err, SchedulerError::NoCandidate(_)));
        assert!(err.to_string().starts_with("strategy:"));
        assert_eq!(runtime.create_calls().await, 0);
        assert!(store.list_containers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_cluster_has_no_candidate() {
        let runtime = Arc::new(MockRuntime::new());
        let cluster = cluster_with(&runtime, &[], 0.0).await;
        let scheduler = scheduler(cluster, Arc::new(StateStore::open_in_memory().unwrap()));

        let err = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoCandidate(_)));
    }

    #[tokio::test]
    async fn create_then_remove_round_trip() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = scheduler(cluster.clone(), store.clone());

        let container = scheduler
            .create_container(&ContainerConfig::new("redis").with_memory(256 * MB), "cache")
            .await
            .unwrap();
        scheduler.remove_container(&container, false).await.unwrap();

        assert!(cluster.containers().await.is_empty());
        assert!(store.list_containers().unwrap().is_empty());
        assert!(runtime.containers_on("10.0.0.1:2375").await.is_empty());
        let view = &cluster.nodes().await[0];
        assert_eq!(view.reserved_memory(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_never_overcommit() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 0.0, GB).await;
        runtime.set_create_delay(Duration::from_millis(10)).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let scheduler = Arc::new(scheduler(cluster.clone(), Arc::new(StateStore::open_in_memory().unwrap())));

        let mut tasks = Vec::new();
        for i in 0..10 {
            let scheduler = Arc::clone(&scheduler);
            tasks.push(tokio::spawn(async move {
                let config = ContainerConfig::new("busybox").with_memory(256 * MB);
                scheduler.create_container(&config, &format!("c{i}")).await
            }));
        }

        let mut placed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => placed += 1,
                Err(e) => assert!(matches!(e, SchedulerError::NoCandidate(_)), "{e}"),
            }
        }

        assert_eq!(placed, 4);
        let view = &cluster.nodes().await[0];
        assert_eq!(view.reserved_memory(), GB);
        assert_eq!(runtime.create_calls().await, 4);
    }

    #[tokio::test]
    async fn runtime_failure_leaves_store_untouched() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        runtime.fail_creates("10.0.0.1:2375", true).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = scheduler(cluster.clone(), store.clone());

        let err = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Runtime(ClusterError::Runtime(_))));
        assert!(err.to_string().starts_with("runtime:"));
        assert!(store.list_containers().unwrap().is_empty());
        assert!(cluster.containers().await.is_empty());
    }

    #[tokio::test]
    async fn commit_failure_is_a_consistency_error() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let scheduler = scheduler(cluster.clone(), Arc::new(BrokenStore));

        let err = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Consistency { operation: "create", .. }));
        assert!(err.to_string().starts_with("store:"));
        // The container is running and still counted against the node.
        let orphan = cluster.container("c1").await.unwrap();
        assert!(!orphan.persisted);
        assert_eq!(runtime.containers_on("10.0.0.1:2375").await, vec!["c1"]);
    }

    #[tokio::test]
    async fn oversized_request_has_no_candidate() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 0.0, GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let scheduler = scheduler(cluster, Arc::new(StateStore::open_in_memory().unwrap()));

        scheduler
            .create_container(&ContainerConfig::new("busybox").with_memory(GB / 2), "c1")
            .await
            .unwrap();
        let huge = ContainerConfig::new("busybox").with_memory(u64::MAX - GB / 4);
        let err = scheduler.create_container(&huge, "c2").await.unwrap_err();

        assert!(matches!(err, SchedulerError::NoCandidate(_)));
        assert_eq!(runtime.create_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn node_leaving_during_create_is_not_recorded() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        runtime.set_create_delay(Duration::from_secs(1)).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = Arc::new(scheduler(cluster.clone(), store.clone()));

        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cluster
            .subscribe(move |e: &ClusterEvent| sink.lock().unwrap().push(e.clone()))
            .await;

        let create = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .create_container(&ContainerConfig::new("busybox"), "c1")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cluster.remove_node("10.0.0.1:2375").await);

        let err = create.await.unwrap().unwrap_err();
        assert!(matches!(err, SchedulerError::NodeUnavailable(ref node) if node == "10.0.0.1:2375"));
        assert!(store.list_containers().unwrap().is_empty());
        assert!(cluster.containers().await.is_empty());

        let events = events.lock().unwrap();
        assert!(matches!(&events[0], ClusterEvent::NodeRemoved { .. }));
        assert!(matches!(
            events.last(),
            Some(ClusterEvent::ContainerUnreachable { container }) if container.id == "c1"
        ));
        assert!(!events.iter().any(|e| matches!(e, ClusterEvent::ContainerCreated { .. })));
    }

    #[tokio::test]
    async fn destroy_failure_keeps_record() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let scheduler = scheduler(cluster.clone(), store.clone());

        let container = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap();
        runtime.fail_destroys("10.0.0.1:2375", true).await;

        let err = scheduler.remove_container(&container, false).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Runtime(_)));
        assert!(store.get_container("c1").unwrap().is_some());
        assert!(cluster.container("c1").await.is_some());
    }

    #[tokio::test]
    async fn adopted_containers_skip_the_store() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        runtime.preload("10.0.0.1:2375", "legacy", "nginx").await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let scheduler = scheduler(cluster.clone(), Arc::new(BrokenStore));

        let legacy = cluster.container("legacy").await.unwrap();
        assert!(!legacy.persisted);
        scheduler.remove_container(&legacy, false).await.unwrap();
        assert!(cluster.containers().await.is_empty());
    }

    #[tokio::test]
    async fn removal_from_departed_node() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375"], 0.0).await;
        let scheduler = scheduler(cluster.clone(), Arc::new(StateStore::open_in_memory().unwrap()));

        let container = scheduler
            .create_container(&ContainerConfig::new("busybox"), "c1")
            .await
            .unwrap();
        cluster.remove_node("10.0.0.1:2375").await;

        let err = scheduler.remove_container(&container, true).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NodeUnavailable(node) if node == "10.0.0.1:2375"));
    }

    #[tokio::test]
    async fn binpack_fills_one_node_first() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_host("10.0.0.1:2375", 0.0, GB).await;
        runtime.add_host("10.0.0.2:2375", 0.0, GB).await;
        let cluster = cluster_with(&runtime, &["10.0.0.1:2375", "10.0.0.2:2375"], 0.0).await;
        let scheduler = Scheduler::new(
            cluster,
            FilterChain::new(),
            Box::new(BinpackStrategy),
            Arc::new(StateStore::open_in_memory().unwrap()),
        );

        let mut nodes = Vec::new();
        for i in 0..4 {
            let config = ContainerConfig::new("busybox").with_memory(256 * MB);
            nodes.push(scheduler.create_container(&config, &format!("c{i}")).await.unwrap().node_id);
        }
        assert!(nodes.iter().all(|n| n == "10.0.0.1:2375"));
    }
}
