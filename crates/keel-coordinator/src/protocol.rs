//! Messages exchanged between members and the coordinator.
//!
//! Transport is left to the caller; these types only fix the shape of each
//! request, response and command.

use keel::{Assignment, Epoch, GroupId, MemberId, Partition};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub group_id: GroupId,
    /// Minted by the coordinator when absent.
    pub member_id: Option<MemberId>,
}

impl JoinRequest {
    pub fn new(group_id: GroupId, member_id: MemberId) -> Self {
        Self {
            group_id,
            member_id: Some(member_id),
        }
    }

    pub fn anonymous(group_id: GroupId) -> Self {
        Self {
            group_id,
            member_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub member_id: MemberId,
    pub epoch: Epoch,
    pub assigned_partitions: Vec<Partition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeartbeatResponse {
    Ok,
    /// The member's epoch has been superseded; it must fetch its assignment again.
    RejoinRequired { epoch: Epoch },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub group_id: GroupId,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub ok: bool,
}

/// Current ownership of one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentView {
    pub member_id: MemberId,
    pub epoch: Epoch,
    pub partitions: Vec<Partition>,
}

/// Coordinator -> member: stop consuming these partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokeCommand {
    pub group_id: GroupId,
    pub epoch: Epoch,
    pub partitions_to_release: Vec<Partition>,
}

/// Coordinator -> member: own exactly these partitions from `epoch` on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignCommand {
    pub group_id: GroupId,
    pub epoch: Epoch,
    pub partitions_to_own: Vec<Partition>,
}

/// Acknowledgement of a revoke or assign command for `epoch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAck {
    pub member_id: MemberId,
    pub epoch: Epoch,
}

impl MemberAck {
    pub fn new(member_id: MemberId, epoch: Epoch) -> Self {
        Self { member_id, epoch }
    }
}

/// Where the group is in the revoke -> assign cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceState {
    Stable,
    Revoking,
    Assigning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupHealth {
    Healthy,
    /// Rebalancing kept failing; the group keeps its last assignment until a
    /// later trigger succeeds.
    Degraded { attempts: u32, reason: String },
}

impl GroupHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, GroupHealth::Degraded { .. })
    }
}

/// Point-in-time snapshot of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub group_id: GroupId,
    pub topic: String,
    pub strategy: String,
    pub state: RebalanceState,
    pub health: GroupHealth,
    pub epoch: Epoch,
    pub members: Vec<MemberId>,
    pub assignment: Assignment,
}
