//! swarmgrid-scheduler: container placement for SwarmGrid.
//!
//! Given a placement request, the scheduler:
//!
//! - Narrows the connected nodes through an ordered filter chain
//! - Lets a strategy pick exactly one node
//! - Creates the container there and commits its record to the store
//! - Reports node/store disagreement as a consistency error
//!
//! # Architecture
//!
//! ```text
//! Scheduler (one mutex around create/remove)
//!   ├── Cluster        (candidate NodeViews, Node::create / destroy)
//!   ├── FilterChain    (health → constraint → affinity → port)
//!   ├── Strategy       (spread | binpack | random)
//!   └── ContainerStore (StateStore records)
//!
//! RetryQueue (independent; replays failed idempotent operations)
//! ```

pub mod error;
pub mod filter;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod strategy;

pub use error::{FilterError, SchedulerError, SchedulerResult, StrategyError};
pub use filter::{
    AffinityFilter, ConstraintFilter, FILTER_NAMES, Filter, FilterChain, HealthFilter, PortFilter,
    filter_by_name,
};
pub use retry::{RetryQueue, Retryable};
pub use scheduler::Scheduler;
pub use store::ContainerStore;
pub use strategy::{
    BinpackStrategy, NodeScore, RandomStrategy, STRATEGY_NAMES, SpreadStrategy, Strategy,
    rank_nodes, score_node, strategy_by_name,
};
