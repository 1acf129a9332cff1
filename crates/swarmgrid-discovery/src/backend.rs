//! The discovery backend capability set.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::entry::Entry;
use crate::error::DiscoveryResult;

/// A source of cluster membership.
///
/// Backends are constructed from a [`DiscoveryUri`](crate::DiscoveryUri)
/// and a heartbeat interval; construction fails fast on malformed URIs.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name (the URI scheme it is registered under).
    fn name(&self) -> &'static str;

    /// Polling / registration interval.
    fn heartbeat(&self) -> Duration;

    /// One-shot membership read.
    async fn fetch(&self) -> DiscoveryResult<Vec<Entry>>;

    /// Send membership snapshots to `tx` until `shutdown` fires or the
    /// receiver goes away.
    ///
    /// The default polls [`fetch`](Backend::fetch) every heartbeat and sends
    /// every successful result; the engine deduplicates.
    async fn watch(&self, tx: mpsc::Sender<Vec<Entry>>, shutdown: watch::Receiver<bool>) {
        poll_watch(self, tx, shutdown).await;
    }

    /// Publish this process's own address into the backend.
    async fn register(&self, addr: &str) -> DiscoveryResult<()>;
}

/// Polling watch: fetch on a fixed timer, skip ticks that fail.
pub async fn poll_watch<B: Backend + ?Sized>(
    backend: &B,
    tx: mpsc::Sender<Vec<Entry>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(backend.heartbeat());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    debug!(backend = backend.name(), heartbeat = ?backend.heartbeat(), "polling watch started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                match backend.fetch().await {
                    Ok(entries) => {
                        if tx.send(entries).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(backend = backend.name(), error = %e, "discovery fetch failed, keeping previous membership");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!(backend = backend.name(), "polling watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::DiscoveryError;

    /// Fails every other fetch.
    struct FlakyBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn heartbeat(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(DiscoveryError::Transport("connection refused".to_string()));
            }
            Ok(vec![Entry::new("10.0.0.1", "2375")])
        }

        async fn register(&self, _addr: &str) -> DiscoveryResult<()> {
            Err(DiscoveryError::NotSupported("flaky"))
        }
    }

    #[tokio::test]
    async fn polling_skips_failed_ticks() {
        let backend = FlakyBackend {
            calls: AtomicU32::new(0),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { backend.watch(tx, shutdown_rx).await });

        for _ in 0..3 {
            let entries = rx.recv().await.unwrap();
            assert_eq!(entries, vec![Entry::new("10.0.0.1", "2375")]);
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn polling_stops_when_receiver_dropped() {
        let backend = FlakyBackend {
            calls: AtomicU32::new(0),
        };
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(rx);

        // Returns instead of polling forever.
        backend.watch(tx, shutdown_rx).await;
    }
}
