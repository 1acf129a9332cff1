//! Manage mode: discovery → cluster → scheduler, plus the retry timer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use swarmgrid_cluster::{Cluster, ClusterEvent, RuntimeClient};
use swarmgrid_discovery::{BackendRegistry, DiscoveryEngine};
use swarmgrid_scheduler::{ContainerStore, RetryQueue, Scheduler};
use swarmgrid_state::StateStore;

use crate::config::DaemonConfig;

/// The assembled manager.
pub struct Manager {
    engine: Arc<DiscoveryEngine>,
    cluster: Arc<Cluster>,
    scheduler: Arc<Scheduler>,
    retry: RetryQueue,
    retry_interval: Duration,
}

impl Manager {
    /// Validate `config` and wire every component. Nothing runs until
    /// [`Manager::run`].
    pub async fn build(
        config: &DaemonConfig,
        registry: &BackendRegistry,
        client: Arc<dyn RuntimeClient>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let backend = registry
            .create(config.discovery_uri()?, config.heartbeat()?)
            .context("discovery backend")?;
        info!(backend = backend.name(), heartbeat = ?backend.heartbeat(), "discovery backend ready");
        let engine = Arc::new(DiscoveryEngine::new(backend));

        let store = match &config.store.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let store = StateStore::open(path)?;
                info!(path = ?path, "state store opened");
                store
            }
            None => {
                warn!("no [store] path configured, container records are kept in memory");
                StateStore::open_in_memory()?
            }
        };
        let store: Arc<dyn ContainerStore> = Arc::new(store);

        let cluster = Arc::new(Cluster::new(client, config.scheduler.overcommit));
        cluster.subscribe(log_event).await;

        let scheduler = Scheduler::new(
            Arc::clone(&cluster),
            config.filter_chain()?,
            config.strategy()?,
            store,
        );
        info!(
            strategy = scheduler.strategy_name(),
            filters = ?scheduler.filter_names(),
            overcommit = cluster.overcommit_ratio(),
            "scheduler initialized"
        );

        Ok(Self {
            engine,
            cluster,
            scheduler: Arc::new(scheduler),
            retry: RetryQueue::new(),
            retry_interval: config.retry_interval()?,
        })
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn retry(&self) -> &RetryQueue {
        &self.retry
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let deltas = self.engine.watch(shutdown.clone());
        let cluster_handle = tokio::spawn(Arc::clone(&self.cluster).run(deltas));

        let retry = self.retry.clone();
        let retry_interval = self.retry_interval;
        let retry_shutdown = shutdown.clone();
        let retry_handle = tokio::spawn(async move {
            retry.run(retry_interval, retry_shutdown).await;
        });

        info!("manager running");
        // A dropped sender also counts as shutdown.
        let _ = shutdown.wait_for(|stop| *stop).await;

        cluster_handle.await.context("cluster task")?;
        retry_handle.await.context("retry task")?;
        info!("manager stopped");
        Ok(())
    }
}

fn log_event(event: &ClusterEvent) {
    match event {
        ClusterEvent::NodeAdded { node } => info!(node = %node, "node joined"),
        ClusterEvent::NodeFailed { node, error } => {
            warn!(node = %node, error = %error, "node could not be connected")
        }
        ClusterEvent::NodeRemoved { node } => info!(node = %node, "node left"),
        ClusterEvent::ContainerCreated { container } => {
            info!(node = %container.node_id, container = %container.id, "container created")
        }
        ClusterEvent::ContainerRemoved { container } => {
            info!(node = %container.node_id, container = %container.id, "container removed")
        }
        ClusterEvent::ContainerUnreachable { container } => {
            warn!(node = %container.node_id, container = %container.id, "container unreachable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_cluster::testing::MockRuntime;

    fn config(uri: &str) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.discovery.uri = Some(uri.to_string());
        config
    }

    #[tokio::test]
    async fn build_rejects_unknown_scheme() {
        let result = Manager::build(
            &config("zk://10.0.0.1:2181/swarm"),
            &BackendRegistry::with_defaults(),
            Arc::new(MockRuntime::new()),
        )
        .await;
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("zk"));
    }

    #[tokio::test]
    async fn build_wires_configured_strategy() {
        let mut config = config("nodes://10.0.0.1:2375");
        config.scheduler.strategy = "binpack".to_string();
        config.scheduler.filters = vec!["health".to_string()];
        config.scheduler.overcommit = 0.25;

        let manager = Manager::build(&config, &BackendRegistry::with_defaults(), Arc::new(MockRuntime::new()))
            .await
            .unwrap();
        assert_eq!(manager.scheduler().strategy_name(), "binpack");
        assert_eq!(manager.scheduler().filter_names(), vec!["health"]);
        assert_eq!(manager.cluster().overcommit_ratio(), 0.25);
        assert!(manager.retry().is_empty().await);
    }

    #[tokio::test]
    async fn build_opens_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("nodes://10.0.0.1:2375");
        config.store.path = Some(dir.path().join("nested").join("state.redb"));

        Manager::build(&config, &BackendRegistry::with_defaults(), Arc::new(MockRuntime::new()))
            .await
            .unwrap();
        assert!(dir.path().join("nested").join("state.redb").exists());
    }
}
