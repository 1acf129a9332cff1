//! swarmgrid-state: persisted container metadata for SwarmGrid.
//!
//! Backed by [redb](https://docs.rs/redb), this crate records every
//! container the scheduler has placed so the cluster view can be audited
//! against what is actually running on the nodes.
//!
//! # Architecture
//!
//! Container records are JSON-serialized into redb's `&[u8]` value
//! column, keyed by container ID. The `StateStore` is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
