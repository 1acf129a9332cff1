//! Errors raised by the container record store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be opened or created.
    #[error("cannot open container store: {0}")]
    Open(String),

    /// redb refused a transaction, table or read.
    #[error("container store unavailable: {0}")]
    Backend(String),

    /// A record could not be written or removed.
    #[error("failed to persist container record: {0}")]
    Write(String),

    /// A record could not be encoded, or the stored bytes are not a record.
    #[error("malformed container record: {0}")]
    Codec(String),

    #[error("no container record for {0}")]
    NotFound(String),
}
