//! Key-value discovery: nodes are keys under `<path>/nodes/`.
//!
//! `KvBackend` is generic over a [`KvStore`] that supports blocking reads
//! with an index watermark. Its watch loop long-polls the store and only
//! reports membership when the index moves.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::entry::{Entry, parse_entries};
use crate::error::DiscoveryResult;

/// Initial delay before retrying a failed watch.
const MIN_WATCH_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound for the watch retry delay.
const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(30);

/// Values under a prefix plus the store's modification index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvListing {
    pub values: Vec<String>,
    pub index: u64,
}

/// A KV store with index-watermarked blocking reads.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read every value under `prefix`.
    async fn list(&self, prefix: &str) -> DiscoveryResult<KvListing>;

    /// Block until the index exceeds `after_index` or `timeout` elapses,
    /// then read every value under `prefix`.
    async fn wait(&self, prefix: &str, after_index: u64, timeout: Duration)
    -> DiscoveryResult<KvListing>;

    /// Write `value` at `key`, expiring after `ttl` if the store supports it.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> DiscoveryResult<()>;
}

/// Discovery backend over any [`KvStore`].
pub struct KvBackend<S> {
    store: S,
    prefix: String,
    heartbeat: Duration,
}

impl<S: KvStore> KvBackend<S> {
    /// Nodes live under `<path>/nodes`.
    pub fn new(store: S, path: &str, heartbeat: Duration) -> Self {
        Self {
            store,
            prefix: format!("{}/nodes", path.trim_matches('/')),
            heartbeat,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registrations expire if not refreshed for three heartbeats.
    fn registration_ttl(&self) -> Duration {
        self.heartbeat * 3
    }
}

#[async_trait]
impl<S: KvStore> Backend for KvBackend<S> {
    fn name(&self) -> &'static str {
        self.store.name()
    }

    fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
        let listing = self.store.list(&self.prefix).await?;
        parse_entries(&listing.values)
    }

    async fn watch(&self, tx: mpsc::Sender<Vec<Entry>>, mut shutdown: watch::Receiver<bool>) {
        let mut index = 0u64;
        let mut first = true;
        let mut backoff = MIN_WATCH_BACKOFF;

        info!(backend = self.name(), prefix = %self.prefix, "kv watch started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                r = self.store.wait(&self.prefix, index, self.heartbeat) => r,
                _ = shutdown.changed() => break,
            };

            match result {
                Ok(listing) => {
                    backoff = MIN_WATCH_BACKOFF;
                    // An index that goes backwards means the store was reset.
                    if listing.index < index {
                        index = 0;
                    }
                    if !first && listing.index == index {
                        continue;
                    }
                    first = false;
                    index = listing.index;

                    match parse_entries(&listing.values) {
                        Ok(entries) => {
                            debug!(backend = self.name(), index, count = entries.len(), "kv membership changed");
                            if tx.send(entries).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(backend = self.name(), error = %e, "ignoring malformed kv membership");
                        }
                    }
                }
                Err(e) => {
                    warn!(backend = self.name(), error = %e, retry_in = ?backoff, "kv watch failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
                }
            }
        }

        info!(backend = self.name(), "kv watch stopped");
    }

    async fn register(&self, addr: &str) -> DiscoveryResult<()> {
        let entry = Entry::parse(addr)?;
        let addr = entry.to_string();
        let key = format!("{}/{}", self.prefix, addr);
        self.store
            .put(&key, &addr, Some(self.registration_ttl()))
            .await?;
        debug!(backend = self.name(), %key, "registered");
        Ok(())
    }
}
