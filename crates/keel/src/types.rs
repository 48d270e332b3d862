//! Core identifiers and data model for partition assignment.

use crate::error::KeelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest member or group identifier accepted, in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Position of a partition within its topic (0..N-1).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Unique identifier for the broker (shard) hosting a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BrokerId(pub u32);

/// Rebalance epoch. Every committed assignment is tagged with a strictly larger epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        PartitionId(id)
    }
}

impl From<PartitionId> for u32 {
    fn from(partition_id: PartitionId) -> Self {
        partition_id.0
    }
}

impl From<u32> for BrokerId {
    fn from(id: u32) -> Self {
        BrokerId(id)
    }
}

impl From<BrokerId> for u32 {
    fn from(broker_id: BrokerId) -> Self {
        broker_id.0
    }
}

impl From<u64> for Epoch {
    fn from(epoch: u64) -> Self {
        Epoch(epoch)
    }
}

impl From<Epoch> for u64 {
    fn from(epoch: Epoch) -> Self {
        epoch.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker-{}", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

fn validate_id(kind: &str, raw: &str) -> Result<(), KeelError> {
    if raw.is_empty() {
        return Err(KeelError::invalid_input(kind, "identifier is empty"));
    }
    if raw.len() > MAX_ID_LEN {
        return Err(KeelError::invalid_input(
            kind,
            format!("identifier is {} bytes, limit is {MAX_ID_LEN}", raw.len()),
        ));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(KeelError::invalid_input(
            kind,
            format!("identifier '{}' contains whitespace or control characters", raw.escape_debug()),
        ));
    }
    Ok(())
}

/// Identifier of a consumer-group member. Ordering is lexicographic, which is the
/// order every strategy assigns in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct MemberId(String);

impl MemberId {
    /// Build a member id, rejecting malformed input.
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeelError> {
        let raw = raw.into();
        validate_id("member id", &raw)?;
        Ok(Self(raw))
    }

    /// Build a member id without validation. Callers must only pass trusted input.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        validate_id("member id", &self.0).is_ok()
    }
}

impl TryFrom<String> for MemberId {
    type Error = KeelError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct GroupId(String);

impl GroupId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeelError> {
        let raw = raw.into();
        validate_id("group id", &raw)?;
        Ok(Self(raw))
    }

    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupId {
    type Error = KeelError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ordered, independently consumable shard of a topic.
///
/// Identity is `(topic, broker_id, partition_id)`; ordering is by topic, then
/// partition id, then broker so catalogs sort by ascending partition id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub topic: String,
    pub broker_id: BrokerId,
    pub partition_id: PartitionId,
}

impl Partition {
    pub fn new(topic: impl Into<String>, broker_id: BrokerId, partition_id: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            broker_id,
            partition_id,
        }
    }
}

impl Ord for Partition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.topic
            .cmp(&other.topic)
            .then(self.partition_id.cmp(&other.partition_id))
            .then(self.broker_id.cmp(&other.broker_id))
    }
}

impl PartialOrd for Partition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.topic, self.partition_id, self.broker_id)
    }
}

/// A consumer-group member as tracked by the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Member {
    pub fn new(group_id: GroupId, member_id: MemberId, now: DateTime<Utc>) -> Self {
        Self {
            member_id,
            group_id,
            joined_at: now,
            last_heartbeat: now,
        }
    }

    /// Whether the last heartbeat is within `session_timeout` of `now`.
    pub fn is_live(&self, now: DateTime<Utc>, session_timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) <= session_timeout
    }
}
