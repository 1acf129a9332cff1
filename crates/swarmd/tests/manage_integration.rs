//! End-to-end manager tests.
//!
//! Discovery reads a real file, nodes are served by the in-memory runtime,
//! and container records land in a redb file, all in one process.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use swarmd::{DaemonConfig, Manager};
use swarmgrid_cluster::testing::MockRuntime;
use swarmgrid_discovery::BackendRegistry;
use swarmgrid_scheduler::SchedulerError;
use swarmgrid_state::{ContainerConfig, StateStore};

const GB: u64 = 1024 * 1024 * 1024;

fn config(cluster_file: &Path, store: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.discovery.uri = Some(format!("file://{}", cluster_file.display()));
    config.discovery.heartbeat = "50ms".to_string();
    config.retry.interval = "50ms".to_string();
    config.store.path = Some(store.to_path_buf());
    config.scheduler.overcommit = 0.0;
    config
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn discovered_node_is_scheduled_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let cluster_file = dir.path().join("cluster");
    let store_path = dir.path().join("state.redb");
    std::fs::write(&cluster_file, "10.0.0.1:2375\n").unwrap();

    let runtime = Arc::new(MockRuntime::new());
    runtime.add_host("10.0.0.1:2375", 2.0, 2 * GB).await;

    let manager = Arc::new(
        Manager::build(
            &config(&cluster_file, &store_path),
            &BackendRegistry::with_defaults(),
            runtime.clone(),
        )
        .await
        .unwrap(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(shutdown_rx).await })
    };

    let cluster = Arc::clone(manager.cluster());
    eventually("node to connect", || {
        let cluster = Arc::clone(&cluster);
        async move { cluster.candidates().await.len() == 1 }
    })
    .await;

    let container = manager
        .scheduler()
        .create_container(&ContainerConfig::new("busybox").with_memory(GB), "c1")
        .await
        .unwrap();
    assert_eq!(container.node_id, "10.0.0.1:2375");
    assert_eq!(cluster.container("c1").await.unwrap().node_id, "10.0.0.1:2375");

    // The node is full now.
    let err = manager
        .scheduler()
        .create_container(&ContainerConfig::new("busybox").with_memory(2 * GB), "c2")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoCandidate(_)));

    // The node leaves the membership file.
    std::fs::write(&cluster_file, "").unwrap();
    eventually("node to leave", || {
        let cluster = Arc::clone(&cluster);
        async move { cluster.nodes().await.is_empty() }
    })
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();
    drop(manager);

    let store = StateStore::open(&store_path).unwrap();
    let record = store.get_container("c1").unwrap().unwrap();
    assert_eq!(record.node_id, "10.0.0.1:2375");
    assert_eq!(record.config.image, "busybox");
}

#[tokio::test]
async fn unreachable_node_never_becomes_a_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let cluster_file = dir.path().join("cluster");
    std::fs::write(&cluster_file, "10.0.0.1:2375\n10.0.0.9:2375\n").unwrap();

    let runtime = Arc::new(MockRuntime::new());
    runtime.add_host("10.0.0.1:2375", 1.0, GB).await;

    let manager = Arc::new(
        Manager::build(
            &config(&cluster_file, &dir.path().join("state.redb")),
            &BackendRegistry::with_defaults(),
            runtime,
        )
        .await
        .unwrap(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(shutdown_rx).await })
    };

    let cluster = Arc::clone(manager.cluster());
    eventually("reachable node to connect", || {
        let cluster = Arc::clone(&cluster);
        async move { cluster.candidates().await.len() == 1 && cluster.pending().await.is_empty() }
    })
    .await;

    let ids: Vec<String> = cluster.nodes().await.into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["10.0.0.1:2375"]);

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();
}
