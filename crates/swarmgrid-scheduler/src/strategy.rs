//! Placement strategies.
//!
//! Every strategy first discards nodes that cannot fit the request, then
//! ranks the rest:
//! - **spread**: lowest projected utilization first (then fewest containers)
//! - **binpack**: highest projected utilization first (then most containers)
//! - **random**: pseudo-random, seeded from the container name
//!
//! Remaining ties go to the smallest node id so placement is reproducible.

use std::cmp::Ordering;

use swarmgrid_cluster::NodeView;
use swarmgrid_state::{ContainerConfig, NodeId};

use crate::error::StrategyError;

/// Names accepted by [`strategy_by_name`].
pub const STRATEGY_NAMES: &[&str] = &["spread", "binpack", "random"];

/// Selects exactly one node from the filtered candidates.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick the node for container `name` with `config`.
    fn place(
        &self,
        name: &str,
        config: &ContainerConfig,
        nodes: &[NodeView],
    ) -> Result<NodeId, StrategyError>;
}

/// Projected utilization of a node if `config` were placed on it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub node_id: NodeId,
    /// Mean projected utilization over the resources the node reports,
    /// 0.0..=100.0.
    pub score: f64,
    /// Containers already on the node.
    pub containers: usize,
}

/// Score a node, or `None` if the request does not fit.
pub fn score_node(node: &NodeView, config: &ContainerConfig) -> Option<NodeScore> {
    if !node.fits(config) {
        return None;
    }
    let projected_memory = node.projected_memory(config)?;

    let mut ratios = Vec::with_capacity(2);
    let usable_cpus = node.usable_cpus();
    if usable_cpus > 0.0 {
        ratios.push((node.reserved_cpus() + config.cpus) / usable_cpus);
    }
    let usable_memory = node.usable_memory();
    if usable_memory > 0 {
        ratios.push(projected_memory as f64 / usable_memory as f64);
    }
    let score = if ratios.is_empty() {
        0.0
    } else {
        (ratios.iter().sum::<f64>() / ratios.len() as f64).min(1.0) * 100.0
    };

    Some(NodeScore {
        node_id: node.id.clone(),
        score,
        containers: node.containers.len(),
    })
}

/// Score all nodes that fit, most utilized first. Ties: more containers
/// first, then smallest id.
pub fn rank_nodes(nodes: &[NodeView], config: &ContainerConfig) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes.iter().filter_map(|n| score_node(n, config)).collect();
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.containers.cmp(&a.containers))
            .then(a.node_id.cmp(&b.node_id))
    });
    scores
}

/// Spread load: least utilized node wins.
#[derive(Debug, Default)]
pub struct SpreadStrategy;

impl Strategy for SpreadStrategy {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn place(
        &self,
        _name: &str,
        config: &ContainerConfig,
        nodes: &[NodeView],
    ) -> Result<NodeId, StrategyError> {
        rank_nodes(nodes, config)
            .into_iter()
            .min_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(Ordering::Equal)
                    .then(a.containers.cmp(&b.containers))
                    .then(a.node_id.cmp(&b.node_id))
            })
            .map(|s| s.node_id)
            .ok_or(StrategyError::NoFit)
    }
}

/// Pack nodes: most utilized node that still fits wins.
#[derive(Debug, Default)]
pub struct BinpackStrategy;

impl Strategy for BinpackStrategy {
    fn name(&self) -> &'static str {
        "binpack"
    }

    fn place(
        &self,
        _name: &str,
        config: &ContainerConfig,
        nodes: &[NodeView],
    ) -> Result<NodeId, StrategyError> {
        rank_nodes(nodes, config)
            .into_iter()
            .next()
            .map(|s| s.node_id)
            .ok_or(StrategyError::NoFit)
    }
}

/// Pseudo-random placement that is stable for a given name.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl Strategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn place(
        &self,
        name: &str,
        config: &ContainerConfig,
        nodes: &[NodeView],
    ) -> Result<NodeId, StrategyError> {
        let mut fitting: Vec<&NodeView> = nodes.iter().filter(|n| n.fits(config)).collect();
        if fitting.is_empty() {
            return Err(StrategyError::NoFit);
        }
        fitting.sort_by(|a, b| a.id.cmp(&b.id));

        let seed: &str = if name.is_empty() { &config.image } else { name };
        let idx = (fnv1a(seed.as_bytes()) % fitting.len() as u64) as usize;
        Ok(fitting[idx].id.clone())
    }
}

/// 64-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Construct a shipped strategy by name.
pub fn strategy_by_name(name: &str) -> Result<Box<dyn Strategy>, StrategyError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "spread" => Ok(Box::new(SpreadStrategy)),
        "binpack" => Ok(Box::new(BinpackStrategy)),
        "random" => Ok(Box::new(RandomStrategy)),
        other => Err(StrategyError::Unknown(other.to_string())),
    }
}
