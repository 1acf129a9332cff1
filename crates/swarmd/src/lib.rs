//! swarmd: the SwarmGrid daemon.
//!
//! - `manage`: watch discovery, keep the cluster in sync, schedule containers
//! - `join`: keep this node's address registered in discovery
//! - `list`: print the current membership once

pub mod config;
pub mod join;
pub mod manage;

pub use config::DaemonConfig;
pub use join::{Registration, run_join};
pub use manage::Manager;
