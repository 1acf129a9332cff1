//! Best-effort retry queue.
//!
//! Holds operations that did not complete and replays them on every
//! `process()` until they report success or are removed. There is no
//! backoff and no attempt limit; the caller owns the cadence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

/// An operation that can be attempted repeatedly.
#[async_trait]
pub trait Retryable: Send + Sync {
    /// Queue key; a newer item with the same id replaces an older one.
    fn id(&self) -> &str;

    /// Try once. Returns true when the operation is done.
    async fn attempt(&self) -> bool;
}

/// Cloneable handle to a shared queue.
#[derive(Clone, Default)]
pub struct RetryQueue {
    items: Arc<Mutex<HashMap<String, Arc<dyn Retryable>>>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt `item` now; queue it if that fails.
    ///
    /// Returns true if the attempt succeeded.
    pub async fn add(&self, item: Arc<dyn Retryable>) -> bool {
        let id = item.id().to_string();
        if item.attempt().await {
            // A stale pending attempt is superseded.
            self.items.lock().await.remove(&id);
            return true;
        }
        debug!(item = %id, "queued for retry");
        self.items.lock().await.insert(id, item);
        false
    }

    /// Attempt every queued item once and drop the ones that succeed.
    ///
    /// Returns how many items remain queued.
    pub async fn process(&self) -> usize {
        let snapshot: Vec<Arc<dyn Retryable>> = self.items.lock().await.values().cloned().collect();

        for item in snapshot {
            if item.attempt().await {
                let mut items = self.items.lock().await;
                // Keep a replacement added while this attempt was running.
                if items.get(item.id()).is_some_and(|current| Arc::ptr_eq(current, &item)) {
                    items.remove(item.id());
                    debug!(item = %item.id(), "retry succeeded");
                }
            }
        }
        self.len().await
    }

    /// Cancel queued items.
    pub async fn remove<S: AsRef<str>>(&self, ids: &[S]) {
        let mut items = self.items.lock().await;
        for id in ids {
            items.remove(id.as_ref());
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.items.lock().await.contains_key(id)
    }

    /// Process the queue every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(?interval, "retry queue started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let remaining = self.process().await;
                    if remaining > 0 {
                        debug!(remaining, "retry pass finished");
                    }
                }
                _ = shutdown.changed() => {
                    info!("retry queue shutting down");
                    break;
                }
            }
        }
    }
}
