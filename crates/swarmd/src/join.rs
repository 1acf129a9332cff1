//! Join mode: keep this node's address registered in discovery.
//!
//! Each heartbeat hands a fresh registration to the retry queue. A failed
//! registration stays queued and is replayed on the retry tick until it
//! succeeds or the next heartbeat supersedes it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use swarmgrid_discovery::{DiscoveryEngine, Entry};
use swarmgrid_scheduler::{RetryQueue, Retryable};

/// One registration of `addr`.
pub struct Registration {
    id: String,
    addr: String,
    engine: Arc<DiscoveryEngine>,
}

impl Registration {
    pub fn new(engine: Arc<DiscoveryEngine>, addr: &str) -> Self {
        Self {
            id: format!("register/{addr}"),
            addr: addr.to_string(),
            engine,
        }
    }
}

#[async_trait]
impl Retryable for Registration {
    fn id(&self) -> &str {
        &self.id
    }

    async fn attempt(&self) -> bool {
        match self.engine.register(&self.addr).await {
            Ok(()) => {
                debug!(addr = %self.addr, "registered");
                true
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "registration failed, will retry");
                false
            }
        }
    }
}

/// Register `advertise` every `heartbeat` until `shutdown` fires.
pub async fn run_join(
    engine: Arc<DiscoveryEngine>,
    advertise: &str,
    heartbeat: Duration,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let entry = Entry::parse(advertise).context("--advertise must be host:port")?;
    let addr = entry.to_string();

    let retry = RetryQueue::new();
    let retry_handle = {
        let retry = retry.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { retry.run(retry_interval, shutdown).await })
    };

    info!(addr = %addr, backend = engine.backend().name(), ?heartbeat, "joining cluster");
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                retry.add(Arc::new(Registration::new(Arc::clone(&engine), &addr))).await;
            }
            _ = shutdown.changed() => break,
        }
    }

    retry_handle.await.context("retry task")?;
    info!(addr = %addr, "join stopped");
    Ok(())
}
