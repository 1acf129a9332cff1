//! Scheduler error types.

use thiserror::Error;

use swarmgrid_cluster::ClusterError;
use swarmgrid_state::StateError;

/// Errors raised while evaluating a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unknown filter: {0}")]
    Unknown(String),
}

/// Errors raised by a placement strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("no node can fit the requested resources")]
    NoFit,

    #[error("unknown strategy: {0}")]
    Unknown(String),
}

/// Errors surfaced by `Scheduler::create_container` and
/// `Scheduler::remove_container`. Each names the stage that failed.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("filter {filter}: {reason}")]
    Filter { filter: &'static str, reason: String },

    #[error("strategy: no suitable node: {0}")]
    NoCandidate(String),

    #[error("runtime: {0}")]
    Runtime(#[from] ClusterError),

    /// The node and the store disagree; not repaired automatically.
    #[error("store: {operation} of container {container} on {node} not recorded: {source}")]
    Consistency {
        operation: &'static str,
        container: String,
        node: String,
        #[source]
        source: StateError,
    },

    #[error("node unavailable: {0}")]
    NodeUnavailable(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
