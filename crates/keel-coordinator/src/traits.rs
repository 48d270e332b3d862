//! Async seams between the coordinator, its members and its callers.

use crate::{
    CoordinatorError,
    protocol::{
        AssignCommand, AssignmentView, GroupDescription, HeartbeatRequest, HeartbeatResponse,
        JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, MemberAck, RevokeCommand,
    },
};
use async_trait::async_trait;
use keel::{GroupId, MemberId};
use std::sync::Arc;

/// The coordinator's way of pushing commands to one member.
///
/// Each call resolves once the member acknowledges. The coordinator bounds every
/// call with its own ack timeout, so implementations need not time out themselves.
#[async_trait]
pub trait MemberHandle: Send + Sync {
    async fn revoke(&self, command: RevokeCommand) -> Result<MemberAck, CoordinatorError>;

    async fn assign(&self, command: AssignCommand) -> Result<MemberAck, CoordinatorError>;
}

/// Member-facing coordinator operations.
#[async_trait]
pub trait RebalanceService: Send + Sync {
    /// Join a group. Resolves after the rebalance triggered by the join, with
    /// the partitions the new member owns.
    async fn join(
        &self,
        request: JoinRequest,
        handle: Arc<dyn MemberHandle>,
    ) -> Result<JoinResponse, CoordinatorError>;

    async fn heartbeat(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, CoordinatorError>;

    async fn leave(&self, request: LeaveRequest) -> Result<LeaveResponse, CoordinatorError>;

    async fn fetch_assignment(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
    ) -> Result<AssignmentView, CoordinatorError>;

    async fn describe_group(&self, group_id: &GroupId)
    -> Result<GroupDescription, CoordinatorError>;
}
