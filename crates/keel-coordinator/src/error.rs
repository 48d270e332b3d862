//! Error types for group coordination.

use keel::KeelError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// Roster, catalog or assignment failure from the core crate.
    Membership(KeelError),
    /// A member acted on an epoch that is not the group's current one.
    StaleEpoch {
        group_id: String,
        member_id: String,
        current_epoch: u64,
        stale_epoch: u64,
    },
    RebalanceTimeout {
        group_id: String,
        member_id: String,
        phase: String,
        timeout_ms: u64,
    },
    GroupDegraded {
        group_id: String,
        attempts: u32,
    },
    GroupNotFound {
        group_id: String,
    },
    GroupAlreadyExists {
        group_id: String,
    },
    InvalidConfig {
        context: String,
        reason: String,
    },
    ConfigIo {
        context: String,
        reason: String,
    },
    /// The other end of a group queue or member channel has gone away.
    ChannelClosed {
        context: String,
    },
    /// The member was dropped before its join completed.
    MemberRejected {
        member_id: String,
        reason: String,
    },
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Membership(e) => write!(f, "{e}"),
            CoordinatorError::StaleEpoch {
                group_id,
                member_id,
                current_epoch,
                stale_epoch,
            } => {
                write!(
                    f,
                    "Stale epoch from member '{member_id}' in group '{group_id}': \
                     got {stale_epoch}, current {current_epoch}"
                )
            }
            CoordinatorError::RebalanceTimeout {
                group_id,
                member_id,
                phase,
                timeout_ms,
            } => {
                write!(
                    f,
                    "Member '{member_id}' of group '{group_id}' did not acknowledge \
                     {phase} within {timeout_ms}ms"
                )
            }
            CoordinatorError::GroupDegraded { group_id, attempts } => {
                write!(
                    f,
                    "Group '{group_id}' is degraded after {attempts} failed rebalance attempts"
                )
            }
            CoordinatorError::GroupNotFound { group_id } => {
                write!(f, "Group '{group_id}' not found")
            }
            CoordinatorError::GroupAlreadyExists { group_id } => {
                write!(f, "Group '{group_id}' is already registered")
            }
            CoordinatorError::InvalidConfig { context, reason } => {
                write!(f, "Invalid configuration in {context}: {reason}")
            }
            CoordinatorError::ConfigIo { context, reason } => {
                write!(f, "Configuration I/O error in {context}: {reason}")
            }
            CoordinatorError::ChannelClosed { context } => {
                write!(f, "Channel closed during {context}")
            }
            CoordinatorError::MemberRejected { member_id, reason } => {
                write!(f, "Member '{member_id}' rejected: {reason}")
            }
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Membership(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KeelError> for CoordinatorError {
    fn from(e: KeelError) -> Self {
        CoordinatorError::Membership(e)
    }
}

impl CoordinatorError {
    pub fn is_not_found(&self) -> bool {
        match self {
            CoordinatorError::Membership(e) => e.is_not_found(),
            CoordinatorError::GroupNotFound { .. } => true,
            _ => false,
        }
    }

    pub fn is_client_error(&self) -> bool {
        match self {
            CoordinatorError::Membership(e) => e.is_client_error(),
            CoordinatorError::StaleEpoch { .. }
            | CoordinatorError::GroupNotFound { .. }
            | CoordinatorError::GroupAlreadyExists { .. }
            | CoordinatorError::InvalidConfig { .. } => true,
            _ => false,
        }
    }

    /// Failures the coordinator recovers from by retrying the rebalance.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::RebalanceTimeout { .. }
                | CoordinatorError::StaleEpoch { .. }
                | CoordinatorError::ChannelClosed { .. }
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        CoordinatorError::ConfigIo {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_parse_error(e: impl fmt::Display, context: &str) -> Self {
        CoordinatorError::InvalidConfig {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn channel_closed(context: &str) -> Self {
        CoordinatorError::ChannelClosed {
            context: context.to_string(),
        }
    }

    pub fn invalid_config(context: &str, reason: impl Into<String>) -> Self {
        CoordinatorError::InvalidConfig {
            context: context.to_string(),
            reason: reason.into(),
        }
    }
}
