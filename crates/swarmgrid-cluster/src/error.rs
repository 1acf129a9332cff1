//! Error types for the cluster model and the runtime client.

use thiserror::Error;

/// Result type alias for runtime client calls.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Failures talking to a node's container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid runtime response: {0}")]
    Decode(String),

    #[error("request to {0} timed out")]
    Timeout(String),
}

/// Errors raised by nodes and the cluster aggregate.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {0} is not connected")]
    NodeNotConnected(String),

    #[error("container {container} not found on node {node}")]
    ContainerNotFound { node: String, container: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
