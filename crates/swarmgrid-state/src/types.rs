//! Domain types for the SwarmGrid state store.
//!
//! `ContainerConfig` is the placement request handed to the scheduler and
//! forwarded to the container runtime; `ContainerRecord` is what the store
//! keeps once a placement has been committed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a container (assigned by the runtime).
pub type ContainerId = String;

/// Unique identifier for a node in the cluster (its `host:port` address).
pub type NodeId = String;

// ── Container config ──────────────────────────────────────────────

/// Requested configuration for a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference (e.g. `busybox:latest`).
    pub image: String,
    /// Command override.
    pub cmd: Vec<String>,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// CPUs reserved for the container (fractional).
    pub cpus: f64,
    /// Memory reserved for the container, in bytes.
    pub memory_bytes: u64,
    /// Published ports.
    pub ports: Vec<PortBinding>,
    /// Placement constraints, e.g. `region==eu-west` or `node!=db-*`.
    pub constraints: Vec<String>,
    /// Placement affinities, e.g. `container==frontend` or `image==redis`.
    pub affinities: Vec<String>,
}

impl ContainerConfig {
    /// Create a config for the given image with no reservations.
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            ..Self::default()
        }
    }

    /// Reserve memory for the container.
    pub fn with_memory(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    /// Reserve CPUs for the container.
    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = cpus;
        self
    }

    /// Add a placement constraint expression.
    pub fn with_constraint(mut self, expr: &str) -> Self {
        self.constraints.push(expr.to_string());
        self
    }

    /// Add a placement affinity expression.
    pub fn with_affinity(mut self, expr: &str) -> Self {
        self.affinities.push(expr.to_string());
        self
    }

    /// Publish a container port on a fixed host port.
    pub fn with_host_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.push(PortBinding {
            container_port,
            host_port: Some(host_port),
            protocol: Protocol::Tcp,
        });
        self
    }

    /// Host ports this container needs exclusively.
    pub fn host_ports(&self) -> impl Iterator<Item = (u16, Protocol)> + '_ {
        self.ports
            .iter()
            .filter_map(|p| p.host_port.map(|hp| (hp, p.protocol)))
    }
}

/// A container port published on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    /// Host port; `None` lets the runtime pick an ephemeral one.
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

// ── Container record ──────────────────────────────────────────────

/// Persisted record of a scheduled container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub name: String,
    pub node_id: NodeId,
    pub config: ContainerConfig,
    /// Unix timestamp (seconds) when the record was committed.
    pub created_at: u64,
}

impl ContainerRecord {
    /// Build the key for the containers table.
    pub fn table_key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_collects_host_ports() {
        let config = ContainerConfig::new("nginx")
            .with_host_port(80, 8080)
            .with_memory(64 * 1024 * 1024);

        let ports: Vec<_> = config.host_ports().collect();
        assert_eq!(ports, vec![(8080, Protocol::Tcp)]);
        assert_eq!(config.memory_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ContainerConfig = serde_json::from_str(r#"{"image":"busybox"}"#).unwrap();
        assert_eq!(config.image, "busybox");
        assert!(config.constraints.is_empty());
        assert_eq!(config.cpus, 0.0);
    }
}
