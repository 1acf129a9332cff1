//! In-process KV store with an index watermark and per-key TTL.
//!
//! Every write (and every expiry) bumps the index; blocked readers are
//! woken through a `watch` channel carrying the latest index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::backends::kv::{KvListing, KvStore};
use crate::error::DiscoveryResult;

struct KvValue {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct KvState {
    entries: BTreeMap<String, KvValue>,
    index: u64,
}

impl KvState {
    /// Drop expired keys; returns true if anything was removed.
    fn purge_expired(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|_, v| v.expires_at.is_none_or(|deadline| deadline > now));
        if self.entries.len() != before {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn listing(&self, prefix: &str) -> KvListing {
        let dir = format!("{prefix}/");
        KvListing {
            values: self
                .entries
                .range(dir.clone()..)
                .take_while(|(k, _)| k.starts_with(&dir))
                .map(|(_, v)| v.value.clone())
                .collect(),
            index: self.index,
        }
    }
}

/// Shared in-memory KV store; clones see the same data.
#[derive(Clone)]
pub struct MemoryKv {
    state: Arc<Mutex<KvState>>,
    notify: Arc<watch::Sender<u64>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(KvState::default())),
            notify: Arc::new(notify),
        }
    }

    /// Delete a key. Returns true if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        let existed = state.entries.remove(key).is_some();
        if existed {
            state.index += 1;
            self.notify.send_replace(state.index);
        }
        existed
    }

    /// Current modification index.
    pub async fn index(&self) -> u64 {
        self.state.lock().await.index
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> DiscoveryResult<KvListing> {
        let mut state = self.state.lock().await;
        if state.purge_expired(Instant::now()) {
            self.notify.send_replace(state.index);
        }
        Ok(state.listing(prefix))
    }

    async fn wait(
        &self,
        prefix: &str,
        after_index: u64,
        timeout: Duration,
    ) -> DiscoveryResult<KvListing> {
        // Subscribe before reading so a write in between is not missed.
        let mut changes = self.notify.subscribe();
        let listing = self.list(prefix).await?;
        if listing.index > after_index {
            return Ok(listing);
        }
        let _ = tokio::time::timeout(timeout, changes.changed()).await;
        self.list(prefix).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> DiscoveryResult<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            KvValue {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        state.index += 1;
        self.notify.send_replace(state.index);
        Ok(())
    }
}
