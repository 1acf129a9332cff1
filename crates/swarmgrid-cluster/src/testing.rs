//! In-memory [`RuntimeClient`] for tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use swarmgrid_state::ContainerConfig;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerHandle, ContainerSummary, EngineInfo, RuntimeClient};

#[derive(Default)]
struct MockHost {
    info: EngineInfo,
    containers: BTreeMap<String, ContainerSummary>,
    fail_create: bool,
    fail_destroy: bool,
}

#[derive(Default)]
struct MockState {
    hosts: HashMap<String, MockHost>,
    connect_delay: Duration,
    create_delay: Duration,
    create_calls: usize,
    destroy_calls: usize,
    next_id: u64,
}

/// Fake hosts keyed by address. Unknown addresses refuse connections.
///
/// Created containers use their name as id (or `ctr-N` when unnamed), and
/// names are unique per host.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_host(&self, addr: &str, cpus: f64, memory_bytes: u64) {
        self.add_host_with(
            addr,
            EngineInfo {
                name: addr.split(':').next().unwrap_or(addr).to_string(),
                cpus,
                memory_bytes,
                labels: BTreeMap::new(),
            },
        )
        .await;
    }

    pub async fn add_host_with(&self, addr: &str, info: EngineInfo) {
        self.state.lock().await.hosts.insert(
            addr.to_string(),
            MockHost {
                info,
                ..MockHost::default()
            },
        );
    }

    pub async fn remove_host(&self, addr: &str) {
        self.state.lock().await.hosts.remove(addr);
    }

    /// Put a container on a host as if it had been started out of band.
    pub async fn preload(&self, addr: &str, id: &str, image: &str) {
        if let Some(host) = self.state.lock().await.hosts.get_mut(addr) {
            host.containers.insert(
                id.to_string(),
                ContainerSummary {
                    id: id.to_string(),
                    name: id.to_string(),
                    image: image.to_string(),
                    ..ContainerSummary::default()
                },
            );
        }
    }

    pub async fn fail_creates(&self, addr: &str, fail: bool) {
        if let Some(host) = self.state.lock().await.hosts.get_mut(addr) {
            host.fail_create = fail;
        }
    }

    pub async fn fail_destroys(&self, addr: &str, fail: bool) {
        if let Some(host) = self.state.lock().await.hosts.get_mut(addr) {
            host.fail_destroy = fail;
        }
    }

    /// Make every `info` call take this long.
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().await.connect_delay = delay;
    }

    /// Make every create take this long.
    pub async fn set_create_delay(&self, delay: Duration) {
        self.state.lock().await.create_delay = delay;
    }

    /// Container ids on a host, sorted.
    pub async fn containers_on(&self, addr: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .hosts
            .get(addr)
            .map(|h| h.containers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    pub async fn destroy_calls(&self) -> usize {
        self.state.lock().await.destroy_calls
    }
}

fn refused(addr: &str) -> RuntimeError {
    RuntimeError::Connect {
        addr: addr.to_string(),
        reason: "connection refused".to_string(),
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn info(&self, addr: &str) -> RuntimeResult<EngineInfo> {
        let delay = self.state.lock().await.connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().await;
        state
            .hosts
            .get(addr)
            .map(|h| h.info.clone())
            .ok_or_else(|| refused(addr))
    }

    async fn create_container(
        &self,
        addr: &str,
        config: &ContainerConfig,
        name: &str,
    ) -> RuntimeResult<ContainerHandle> {
        let delay = {
            let mut state = self.state.lock().await;
            state.create_calls += 1;
            state.create_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = if name.is_empty() {
            format!("ctr-{}", state.next_id)
        } else {
            name.to_string()
        };

        let host = state.hosts.get_mut(addr).ok_or_else(|| refused(addr))?;
        if host.fail_create {
            return Err(RuntimeError::Api {
                status: 500,
                message: "create failed".to_string(),
            });
        }
        if host.containers.contains_key(&id) {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("name {id} is already in use"),
            });
        }

        host.containers.insert(
            id.clone(),
            ContainerSummary {
                id: id.clone(),
                name: name.to_string(),
                image: config.image.clone(),
                labels: config.labels.clone(),
                ports: config.ports.clone(),
            },
        );
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn destroy_container(&self, addr: &str, id: &str, _force: bool) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        state.destroy_calls += 1;
        let host = state.hosts.get_mut(addr).ok_or_else(|| refused(addr))?;
        if host.fail_destroy {
            return Err(RuntimeError::Api {
                status: 500,
                message: "destroy failed".to_string(),
            });
        }
        host.containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))
    }

    async fn list_containers(&self, addr: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let state = self.state.lock().await;
        state
            .hosts
            .get(addr)
            .map(|h| h.containers.values().cloned().collect())
            .ok_or_else(|| refused(addr))
    }
}
