//! Shipped discovery backends.

pub mod consul;
pub mod file;
pub mod kv;
pub mod memory;
pub mod nodes;

pub use consul::ConsulKv;
pub use file::FileBackend;
pub use kv::{KvBackend, KvListing, KvStore};
pub use memory::MemoryKv;
pub use nodes::NodesBackend;
