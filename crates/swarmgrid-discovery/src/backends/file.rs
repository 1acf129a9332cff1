//! File backend: `file:///etc/swarmgrid/cluster`, one address per line.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::Backend;
use crate::entry::{Entry, parse_entries};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::uri::DiscoveryUri;

/// Polls a local file. Blank lines and `#` comments are ignored; ranges
/// are expanded.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    heartbeat: Duration,
}

impl FileBackend {
    pub fn from_uri(uri: &DiscoveryUri, heartbeat: Duration) -> DiscoveryResult<Self> {
        if uri.rest.trim().is_empty() {
            return Err(DiscoveryError::Configuration(
                "file discovery requires a path, e.g. file:///etc/swarmgrid/cluster".to_string(),
            ));
        }
        Ok(Self {
            path: PathBuf::from(uri.rest.trim()),
            heartbeat,
        })
    }
}

/// Strip comments and whitespace from the file's lines.
fn parse_file_content(content: &str) -> DiscoveryResult<Vec<Entry>> {
    let lines: Vec<&str> = content
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .collect();
    parse_entries(&lines)
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    async fn fetch(&self) -> DiscoveryResult<Vec<Entry>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DiscoveryError::Transport(format!("read {}: {e}", self.path.display()))
        })?;
        let entries = parse_file_content(&content)?;
        debug!(path = %self.path.display(), count = entries.len(), "read discovery file");
        Ok(entries)
    }

    async fn register(&self, _addr: &str) -> DiscoveryResult<()> {
        Err(DiscoveryError::NotSupported("file"))
    }
}
