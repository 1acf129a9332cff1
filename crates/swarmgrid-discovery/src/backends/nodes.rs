//! Static node list: `nodes://10.0.0.[1:3]:2375,10.0.1.5:2375`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::backend::Backend;
use crate::entry::{Entry, parse_entries};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::uri::DiscoveryUri;

/// Read-only backend over a fixed address list.
#[derive(Debug, Clone)]
pub struct NodesBackend {
    entries: Vec<Entry>,
    heartbeat: Duration,
}

impl NodesBackend {
    pub fn from_uri(uri: &DiscoveryUri, heartbeat: Duration) -> DiscoveryResult<Self> {
        let addresses = uri.require_addresses()?;
        let entries =
            parse_entries(addresses).map_err(|e| DiscoveryError::Configuration(e.to_string()))?;
        Ok(Self { entries, heartbeat })
    }

    pub fn new(entries: Vec<Entry>, heartbeat: Duration) -> Self {
        Self { entries, heartbeat }
    }
}

#[async_trait]
impl Backend for NodesBackend {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
        Ok(self.entries.clone())
    }

    /// The list never changes: send it once, then idle until shutdown.
    async fn watch(&self, tx: mpsc::Sender<Vec<Entry>>, mut shutdown: watch::Receiver<bool>) {
        if tx.send(self.entries.clone()).await.is_err() {
            return;
        }
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }

    async fn register(&self, _addr: &str) -> DiscoveryResult<()> {
        Err(DiscoveryError::NotSupported("nodes"))
    }
}
