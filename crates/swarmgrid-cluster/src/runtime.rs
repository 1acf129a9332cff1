//! The container-runtime client boundary.
//!
//! The cluster never talks to a host directly; every host operation goes
//! through a [`RuntimeClient`] keyed by the node's address.

use std::collections::BTreeMap;

use async_trait::async_trait;

use swarmgrid_state::{ContainerConfig, PortBinding};

use crate::error::RuntimeResult;

/// Host facts reported by a runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineInfo {
    /// Host name as reported by the runtime.
    pub name: String,
    pub cpus: f64,
    pub memory_bytes: u64,
    pub labels: BTreeMap<String, String>,
}

/// Handle to a container the runtime just created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// A container already present on a host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
}

impl ContainerSummary {
    /// The closest config we can reconstruct for an adopted container.
    pub fn to_config(&self) -> ContainerConfig {
        ContainerConfig {
            image: self.image.clone(),
            labels: self.labels.clone(),
            ports: self.ports.clone(),
            ..ContainerConfig::default()
        }
    }
}

/// Operations the cluster needs from a host's container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Capacity, name and labels of the host at `addr`.
    async fn info(&self, addr: &str) -> RuntimeResult<EngineInfo>;

    async fn create_container(
        &self,
        addr: &str,
        config: &ContainerConfig,
        name: &str,
    ) -> RuntimeResult<ContainerHandle>;

    async fn destroy_container(&self, addr: &str, id: &str, force: bool) -> RuntimeResult<()>;

    async fn list_containers(&self, addr: &str) -> RuntimeResult<Vec<ContainerSummary>>;
}
