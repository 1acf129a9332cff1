//! Candidate filters.
//!
//! Each filter narrows the node list for one placement request. A
//! [`FilterChain`] runs them in order, so a node must survive every filter.

mod affinity;
mod constraint;
pub mod expr;

use swarmgrid_cluster::{NodeState, NodeView};
use swarmgrid_state::ContainerConfig;
use tracing::debug;

use crate::error::{FilterError, SchedulerError, SchedulerResult};

pub use affinity::AffinityFilter;
pub use constraint::ConstraintFilter;

/// Names accepted by [`filter_by_name`].
pub const FILTER_NAMES: &[&str] = &["health", "constraint", "affinity", "port"];

/// A predicate over candidate nodes.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the subset of `nodes` that can host `config`.
    fn filter(
        &self,
        config: &ContainerConfig,
        nodes: Vec<NodeView>,
    ) -> Result<Vec<NodeView>, FilterError>;
}

/// Keeps connected nodes only.
#[derive(Debug, Default)]
pub struct HealthFilter;

impl Filter for HealthFilter {
    fn name(&self) -> &'static str {
        "health"
    }

    fn filter(
        &self,
        _config: &ContainerConfig,
        nodes: Vec<NodeView>,
    ) -> Result<Vec<NodeView>, FilterError> {
        Ok(nodes
            .into_iter()
            .filter(|n| n.state == NodeState::Connected)
            .collect())
    }
}

/// Drops nodes where a requested host port is already bound.
#[derive(Debug, Default)]
pub struct PortFilter;

impl Filter for PortFilter {
    fn name(&self) -> &'static str {
        "port"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        nodes: Vec<NodeView>,
    ) -> Result<Vec<NodeView>, FilterError> {
        let wanted: Vec<_> = config.host_ports().collect();
        if wanted.is_empty() {
            return Ok(nodes);
        }
        Ok(nodes
            .into_iter()
            .filter(|node| {
                !node
                    .containers
                    .iter()
                    .flat_map(|c| c.config.host_ports())
                    .any(|bound| wanted.contains(&bound))
            })
            .collect())
    }
}

/// Construct a shipped filter by name.
pub fn filter_by_name(name: &str) -> Result<Box<dyn Filter>, FilterError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "health" => Ok(Box::new(HealthFilter)),
        "constraint" => Ok(Box::new(ConstraintFilter)),
        "affinity" => Ok(Box::new(AffinityFilter)),
        "port" => Ok(Box::new(PortFilter)),
        other => Err(FilterError::Unknown(other.to_string())),
    }
}

/// Ordered filters; the output of one is the input of the next.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    /// A chain that accepts every node.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Box<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Build a chain from filter names, in the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, FilterError> {
        let filters = names
            .iter()
            .map(|n| filter_by_name(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in order. The first error aborts the chain.
    ///
    /// Filters still run once the list is empty so that a malformed
    /// expression is reported as such.
    pub fn apply(
        &self,
        config: &ContainerConfig,
        mut nodes: Vec<NodeView>,
    ) -> SchedulerResult<Vec<NodeView>> {
        for filter in &self.filters {
            let before = nodes.len();
            nodes = filter
                .filter(config, nodes)
                .map_err(|e| SchedulerError::Filter {
                    filter: filter.name(),
                    reason: e.to_string(),
                })?;
            debug!(filter = filter.name(), before, after = nodes.len(), "filter applied");
        }
        Ok(nodes)
    }
}
