//! Turns raw backend snapshots into deduplicated membership deltas.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::entry::{Entry, diff};
use crate::error::DiscoveryResult;

/// Channel depth between the backend watch task and the diff task.
const SNAPSHOT_BUFFER: usize = 16;
/// Channel depth for deltas handed to the consumer.
const DELTA_BUFFER: usize = 64;

/// A membership change. Never both empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

/// Owns the active backend and the last observed membership.
pub struct DiscoveryEngine {
    backend: Arc<dyn Backend>,
    previous: Mutex<HashSet<String>>,
}

impl DiscoveryEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            previous: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Diff `entries` against the previous membership.
    ///
    /// Returns `None` for a no-op refresh and leaves the previous membership
    /// untouched; otherwise records the new membership and returns the delta.
    pub async fn observe(&self, entries: &[Entry]) -> Option<MembershipDelta> {
        let mut previous = self.previous.lock().await;
        let d = diff(entries, &previous);
        if d.is_empty() {
            return None;
        }
        *previous = d.current;
        Some(MembershipDelta {
            added: d.added,
            removed: d.removed,
        })
    }

    /// The last recorded membership, sorted.
    pub async fn members(&self) -> Vec<String> {
        let previous = self.previous.lock().await;
        let mut members: Vec<String> = previous.iter().cloned().collect();
        members.sort();
        members
    }

    pub async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
        self.backend.fetch().await
    }

    pub async fn register(&self, addr: &str) -> DiscoveryResult<()> {
        self.backend.register(addr).await
    }

    /// Start watching the backend.
    ///
    /// The returned stream yields deltas in backend order and closes when
    /// `shutdown` fires or the backend's watch ends.
    pub fn watch(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> mpsc::Receiver<MembershipDelta> {
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel::<Vec<Entry>>(SNAPSHOT_BUFFER);
        let (delta_tx, delta_rx) = mpsc::channel(DELTA_BUFFER);

        let backend = Arc::clone(&self.backend);
        let watch_shutdown = shutdown.clone();
        tokio::spawn(async move {
            backend.watch(snapshot_tx, watch_shutdown).await;
        });

        let engine = Arc::clone(self);
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            info!(backend = engine.backend.name(), "discovery engine started");
            loop {
                let entries = tokio::select! {
                    next = snapshot_rx.recv() => match next {
                        Some(entries) => entries,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                };

                if let Some(delta) = engine.observe(&entries).await {
                    debug!(
                        added = delta.added.len(),
                        removed = delta.removed.len(),
                        "membership changed"
                    );
                    if delta_tx.send(delta).await.is_err() {
                        break;
                    }
                }
            }
            info!(backend = engine.backend.name(), "discovery engine stopped");
        });

        delta_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::backends::{KvBackend, MemoryKv, NodesBackend};
    use crate::error::DiscoveryError;

    fn entries(addrs: &[&str]) -> Vec<Entry> {
        addrs.iter().map(|a| Entry::parse(a).unwrap()).collect()
    }

    fn engine_with_nodes(addrs: &[&str]) -> Arc<DiscoveryEngine> {
        let backend = NodesBackend::new(entries(addrs), Duration::from_secs(1));
        Arc::new(DiscoveryEngine::new(Arc::new(backend)))
    }

    #[tokio::test]
    async fn identical_snapshots_emit_nothing() {
        let engine = engine_with_nodes(&[]);
        let snapshot = entries(&["10.0.0.1:2375", "10.0.0.2:2375"]);

        let first = engine.observe(&snapshot).await.unwrap();
        assert_eq!(first.added.len(), 2);
        assert!(first.removed.is_empty());

        // Same set in a different order.
        let reordered = entries(&["10.0.0.2:2375", "10.0.0.1:2375"]);
        assert!(engine.observe(&reordered).await.is_none());
        assert!(engine.observe(&snapshot).await.is_none());
    }

    #[tokio::test]
    async fn delta_reports_added_and_removed() {
        let engine = engine_with_nodes(&[]);
        engine.observe(&entries(&["10.0.0.1:2375", "10.0.0.2:2375"])).await;

        let delta = engine
            .observe(&entries(&["10.0.0.2:2375", "10.0.0.3:2375"]))
            .await
            .unwrap();
        assert_eq!(delta.added, BTreeSet::from(["10.0.0.3:2375".to_string()]));
        assert_eq!(delta.removed, BTreeSet::from(["10.0.0.1:2375".to_string()]));
        assert_eq!(engine.members().await, vec!["10.0.0.2:2375", "10.0.0.3:2375"]);
    }

    #[tokio::test]
    async fn empty_snapshot_removes_everything() {
        let engine = engine_with_nodes(&[]);
        engine.observe(&entries(&["10.0.0.1:2375"])).await;
        let delta = engine.observe(&[]).await.unwrap();
        assert_eq!(delta.removed.len(), 1);
        assert!(engine.members().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_observations_do_not_lose_updates() {
        let engine = engine_with_nodes(&[]);
        let snapshot = entries(&["10.0.0.1:2375", "10.0.0.2:2375"]);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = Arc::clone(&engine);
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move { engine.observe(&snapshot).await }));
        }

        let mut emitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                emitted += 1;
            }
        }
        // Exactly one caller sees the change; the rest are no-ops.
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn watch_emits_initial_membership() {
        let engine = engine_with_nodes(&["10.0.0.1:2375"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut deltas = engine.watch(shutdown_rx);
        let delta = deltas.recv().await.unwrap();
        assert_eq!(delta.added, BTreeSet::from(["10.0.0.1:2375".to_string()]));

        shutdown_tx.send(true).unwrap();
        assert!(deltas.recv().await.is_none());
    }

    /// Replays scripted snapshots on every poll.
    struct Scripted {
        snapshots: AsyncMutex<Vec<DiscoveryResult<Vec<Entry>>>>,
    }

    #[async_trait]
    impl Backend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn heartbeat(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
            let mut snapshots = self.snapshots.lock().await;
            if snapshots.len() > 1 {
                snapshots.remove(0)
            } else {
                match snapshots.first() {
                    Some(Ok(last)) => Ok(last.clone()),
                    _ => Ok(Vec::new()),
                }
            }
        }

        async fn register(&self, _addr: &str) -> DiscoveryResult<()> {
            Err(DiscoveryError::NotSupported("scripted"))
        }
    }

    #[tokio::test]
    async fn polling_errors_and_repeats_are_suppressed() {
        let backend = Scripted {
            snapshots: AsyncMutex::new(vec![
                Ok(entries(&["10.0.0.1:2375"])),
                Ok(entries(&["10.0.0.1:2375"])),
                Err(DiscoveryError::Transport("refused".to_string())),
                Ok(entries(&["10.0.0.1:2375"])),
                Ok(entries(&["10.0.0.1:2375", "10.0.0.2:2375"])),
            ]),
        };
        let engine = Arc::new(DiscoveryEngine::new(Arc::new(backend)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut deltas = engine.watch(shutdown_rx);

        let first = deltas.recv().await.unwrap();
        assert_eq!(first.added, BTreeSet::from(["10.0.0.1:2375".to_string()]));

        // The repeat and the failed tick produce nothing; the next delta is
        // the real change.
        let second = deltas.recv().await.unwrap();
        assert_eq!(second.added, BTreeSet::from(["10.0.0.2:2375".to_string()]));
        assert!(second.removed.is_empty());
    }

    #[tokio::test]
    async fn register_passes_through() {
        let backend = KvBackend::new(MemoryKv::new(), "swarm", Duration::from_secs(10));
        let engine = DiscoveryEngine::new(Arc::new(backend));

        engine.register("10.0.0.7:2375").await.unwrap();
        let fetched = engine.fetch().await.unwrap();
        assert_eq!(fetched, entries(&["10.0.0.7:2375"]));

        let static_engine = engine_with_nodes(&["10.0.0.1:2375"]);
        assert!(matches!(
            static_engine.register("10.0.0.7:2375").await,
            Err(DiscoveryError::NotSupported("nodes"))
        ));
    }
}
