//! Discovery error types.

use thiserror::Error;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors raised by discovery backends and the engine.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Malformed discovery URI or missing backend parameter. Fatal at startup.
    #[error("invalid discovery configuration: {0}")]
    Configuration(String),

    /// The backend could not be reached.
    #[error("discovery backend unavailable: {0}")]
    Transport(String),

    /// The backend is read-only.
    #[error("operation not supported by the {0} discovery backend")]
    NotSupported(&'static str),

    #[error("invalid address {0:?}: {1}")]
    InvalidEntry(String, String),
}
