//! Keel rebalance coordination.
//!
//! This crate runs one coordinator per consumer group. Each coordinator keeps the
//! group's assignment current as members join, leave or time out and as the
//! topic grows, driving an eager revoke -> assign protocol with epochs,
//! acknowledgement timeouts and bounded retries.

pub mod config;
pub mod error;
pub mod group;
pub mod member;
pub mod protocol;
pub mod service;
pub mod traits;

pub use config::{ClusterManifest, CoordinatorConfig, GroupSpec, ManifestLoader};
pub use error::CoordinatorError;
pub use group::{GroupCoordinator, GroupEvent};
pub use member::{ChannelMemberHandle, MemberCommand, MemberInbox, member_channel};
pub use protocol::*;
pub use service::CoordinatorService;
pub use traits::{MemberHandle, RebalanceService};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
