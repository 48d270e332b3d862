//! Partition assignment core: catalog, membership roster, assignment strategies
//! and producer-side partition selection. Nothing in this crate performs I/O.

pub mod assignment;
pub mod catalog;
pub mod error;
pub mod roster;
pub mod selector;
pub mod telemetry;
pub mod types;

pub use assignment::{
    Assignment, AssignmentStrategy, Movement, StrategyConfig, StrategyKind, assign,
    create_strategy, try_assign,
};
pub use catalog::{InMemoryPartitionCatalog, PartitionCatalog, TopicSpec};
pub use error::KeelError;
pub use roster::MembershipRoster;
pub use selector::{PartitionSelector, SelectMode, key_hash, partition_for_key};
pub use types::*;

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
