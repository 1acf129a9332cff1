//! swarmgrid-discovery: node discovery for SwarmGrid.
//!
//! Discovers the container hosts that make up the cluster through
//! pluggable backends and turns their raw membership snapshots into a
//! deduplicated stream of added/removed addresses.
//!
//! # Architecture
//!
//! ```text
//! BackendRegistry ── scheme://addr[,addr]/path ──► Arc<dyn Backend>
//!                                                    ├── nodes   (static list)
//!                                                    ├── file    (polled file)
//!                                                    └── consul  (KV long-poll)
//! DiscoveryEngine
//!   ├── Backend::watch() → raw Vec<Entry> snapshots
//!   ├── diff(new, previous) under one lock
//!   └── mpsc::Receiver<MembershipDelta> (no-op refreshes suppressed)
//! ```

pub mod backend;
pub mod backends;
pub mod engine;
pub mod entry;
pub mod error;
pub mod registry;
pub mod uri;

pub use backend::Backend;
pub use backends::{ConsulKv, FileBackend, KvBackend, KvListing, KvStore, MemoryKv, NodesBackend};
pub use engine::{DiscoveryEngine, MembershipDelta};
pub use entry::{Entry, MembershipDiff, diff, parse_entries};
pub use error::{DiscoveryError, DiscoveryResult};
pub use registry::BackendRegistry;
pub use uri::DiscoveryUri;
