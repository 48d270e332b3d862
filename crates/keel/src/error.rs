//! Error types for assignment, catalog and membership operations.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum KeelError {
    /// Empty catalog, malformed identifier or otherwise unusable input.
    InvalidInput {
        context: String,
        reason: String,
    },
    DuplicateMember {
        group_id: String,
        member_id: String,
    },
    UnknownMember {
        group_id: String,
        member_id: String,
    },
    TopicNotFound {
        topic: String,
    },
    PartitionOutOfRange {
        topic: String,
        partition: u32,
        partition_count: usize,
    },
    /// A computed assignment broke completeness, disjointness or balance.
    InvariantViolation {
        group_id: String,
        reason: String,
    },
}

impl fmt::Display for KeelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeelError::InvalidInput { context, reason } => {
                write!(f, "Invalid input in {context}: {reason}")
            }
            KeelError::DuplicateMember {
                group_id,
                member_id,
            } => {
                write!(f, "Member '{member_id}' is already live in group '{group_id}'")
            }
            KeelError::UnknownMember {
                group_id,
                member_id,
            } => {
                write!(f, "Member '{member_id}' has not joined group '{group_id}'")
            }
            KeelError::TopicNotFound { topic } => write!(f, "Topic '{topic}' not found"),
            KeelError::PartitionOutOfRange {
                topic,
                partition,
                partition_count,
            } => {
                write!(
                    f,
                    "Partition {partition} out of range for topic '{topic}' \
                     ({partition_count} partitions)"
                )
            }
            KeelError::InvariantViolation { group_id, reason } => {
                write!(f, "Assignment invariant violated for group '{group_id}': {reason}")
            }
        }
    }
}

impl std::error::Error for KeelError {}

impl KeelError {
    pub fn invalid_input(context: &str, reason: impl Into<String>) -> Self {
        KeelError::InvalidInput {
            context: context.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KeelError::UnknownMember { .. } | KeelError::TopicNotFound { .. }
        )
    }

    /// Errors the caller caused and can fix by retrying with correct state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KeelError::InvalidInput { .. }
                | KeelError::DuplicateMember { .. }
                | KeelError::UnknownMember { .. }
                | KeelError::TopicNotFound { .. }
                | KeelError::PartitionOutOfRange { .. }
        )
    }
}
