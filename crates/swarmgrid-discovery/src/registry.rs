//! Scheme → backend constructor mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend::Backend;
use crate::backends::{ConsulKv, FileBackend, NodesBackend};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::uri::DiscoveryUri;

/// Builds a backend from a parsed URI and heartbeat.
pub type BackendFactory = fn(&DiscoveryUri, Duration) -> DiscoveryResult<Arc<dyn Backend>>;

/// Explicitly constructed backend registry, passed to whoever builds the
/// discovery engine.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shipped `nodes`, `file` and `consul` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("nodes", |uri, heartbeat| {
            NodesBackend::from_uri(uri, heartbeat).map(shared)
        });
        registry.register("file", |uri, heartbeat| {
            FileBackend::from_uri(uri, heartbeat).map(shared)
        });
        registry.register("consul", |uri, heartbeat| {
            ConsulKv::backend_from_uri(uri, heartbeat).map(shared)
        });
        registry
    }

    /// Add or replace the constructor for `scheme`.
    pub fn register(&mut self, scheme: &str, factory: BackendFactory) {
        self.factories.insert(scheme.to_ascii_lowercase(), factory);
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Parse `uri` and construct the matching backend.
    pub fn create(&self, uri: &str, heartbeat: Duration) -> DiscoveryResult<Arc<dyn Backend>> {
        if heartbeat.is_zero() {
            return Err(DiscoveryError::Configuration(
                "discovery heartbeat must be greater than zero".to_string(),
            ));
        }

        let parsed = DiscoveryUri::parse(uri)?;
        let factory = self.factories.get(&parsed.scheme).ok_or_else(|| {
            DiscoveryError::Configuration(format!(
                "unsupported discovery scheme {:?} (known: {})",
                parsed.scheme,
                self.schemes().join(", ")
            ))
        })?;

        let backend = factory(&parsed, heartbeat)?;
        debug!(scheme = %parsed.scheme, backend = backend.name(), ?heartbeat, "discovery backend created");
        Ok(backend)
    }
}

fn shared<B: Backend + 'static>(backend: B) -> Arc<dyn Backend> {
    Arc::new(backend)
}
