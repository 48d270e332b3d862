//! Per-group rebalance coordinator.
//!
//! A [`GroupCoordinator`] owns one consumer group and processes its events one
//! at a time, so at most one rebalance per group is ever in flight. Rebalancing
//! is eager: every current owner is told to release all of its partitions, then
//! the new assignment is computed, the epoch is bumped and every member
//! (idle ones included) is told what it owns.

use crate::{
    CoordinatorError,
    config::CoordinatorConfig,
    protocol::{
        AssignCommand, AssignmentView, GroupDescription, GroupHealth, HeartbeatResponse,
        JoinResponse, LeaveResponse, MemberAck, RebalanceState, RevokeCommand,
    },
    traits::MemberHandle,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use keel::{
    Assignment, AssignmentStrategy, Epoch, GroupId, KeelError, MemberId, MembershipRoster,
    PartitionCatalog, assign,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::error::Elapsed;
use tracing::Instrument;

pub type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// Everything a group reacts to, serialized through one queue.
pub enum GroupEvent {
    Join {
        member_id: MemberId,
        handle: Arc<dyn MemberHandle>,
        reply: Reply<JoinResponse>,
    },
    Heartbeat {
        member_id: MemberId,
        epoch: Epoch,
        reply: Reply<HeartbeatResponse>,
    },
    Leave {
        member_id: MemberId,
        reply: Reply<LeaveResponse>,
    },
    FetchAssignment {
        member_id: MemberId,
        reply: Reply<AssignmentView>,
    },
    PartitionsChanged,
    ExpireTick {
        now: DateTime<Utc>,
    },
    Reconcile,
    Describe {
        reply: oneshot::Sender<GroupDescription>,
    },
    Shutdown,
}

impl GroupEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GroupEvent::Join { .. } => "join",
            GroupEvent::Heartbeat { .. } => "heartbeat",
            GroupEvent::Leave { .. } => "leave",
            GroupEvent::FetchAssignment { .. } => "fetch_assignment",
            GroupEvent::PartitionsChanged => "partitions_changed",
            GroupEvent::ExpireTick { .. } => "expire_tick",
            GroupEvent::Reconcile => "reconcile",
            GroupEvent::Describe { .. } => "describe",
            GroupEvent::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Revoke,
    Assign,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Revoke => "revoke",
            Phase::Assign => "assign",
        }
    }
}

type AckResult = Result<Result<MemberAck, CoordinatorError>, Elapsed>;

pub struct GroupCoordinator {
    group_id: GroupId,
    topic: String,
    config: CoordinatorConfig,
    strategy: Box<dyn AssignmentStrategy>,
    catalog: Arc<dyn PartitionCatalog>,
    roster: Arc<MembershipRoster>,
    handles: HashMap<MemberId, Arc<dyn MemberHandle>>,
    assignment: Assignment,
    epoch: Epoch,
    state: RebalanceState,
    health: GroupHealth,
    /// (membership version, partition count) seen by the last rebalance.
    snapshot: Option<(u64, usize)>,
}

impl GroupCoordinator {
    pub fn new(
        group_id: GroupId,
        topic: impl Into<String>,
        config: CoordinatorConfig,
        strategy: Box<dyn AssignmentStrategy>,
        catalog: Arc<dyn PartitionCatalog>,
        roster: Arc<MembershipRoster>,
    ) -> Self {
        Self {
            group_id,
            topic: topic.into(),
            config,
            strategy,
            catalog,
            roster,
            handles: HashMap::new(),
            assignment: Assignment::new(),
            epoch: Epoch::default(),
            state: RebalanceState::Stable,
            health: GroupHealth::Healthy,
            snapshot: None,
        }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn state(&self) -> RebalanceState {
        self.state
    }

    pub fn health(&self) -> &GroupHealth {
        &self.health
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Consume events until the queue closes or a `Shutdown` arrives.
    pub async fn run(mut self, mut events: mpsc::Receiver<GroupEvent>) {
        info!(
            "Coordinator for group '{}' on topic '{}' started with strategy '{}'",
            self.group_id,
            self.topic,
            self.strategy.name()
        );
        while let Some(event) = events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        info!("Coordinator for group '{}' stopped", self.group_id);
    }

    /// Apply one event. Returns false once the coordinator should stop.
    pub async fn handle(&mut self, event: GroupEvent) -> bool {
        debug!("Group '{}' handling {} event", self.group_id, event.kind());
        match event {
            GroupEvent::Join {
                member_id,
                handle,
                reply,
            } => {
                let _ = reply.send(self.join(member_id, handle).await);
            }
            GroupEvent::Heartbeat {
                member_id,
                epoch,
                reply,
            } => {
                let _ = reply.send(self.heartbeat(&member_id, epoch));
            }
            GroupEvent::Leave { member_id, reply } => {
                let _ = reply.send(self.leave(&member_id).await);
            }
            GroupEvent::FetchAssignment { member_id, reply } => {
                let _ = reply.send(self.fetch_assignment(&member_id));
            }
            GroupEvent::PartitionsChanged => {
                self.partitions_changed().await;
            }
            GroupEvent::ExpireTick { now } => {
                self.expire(now).await;
            }
            GroupEvent::Reconcile => {
                self.reconcile().await;
            }
            GroupEvent::Describe { reply } => {
                let _ = reply.send(self.describe());
            }
            GroupEvent::Shutdown => return false,
        }
        true
    }

    /// Add a member and rebalance. Resolves with the member's new partitions.
    pub async fn join(
        &mut self,
        member_id: MemberId,
        handle: Arc<dyn MemberHandle>,
    ) -> Result<JoinResponse, CoordinatorError> {
        self.roster.join(&self.group_id, &member_id)?;
        self.handles.insert(member_id.clone(), handle);
        self.rebalance("member joined").await;

        match self.assignment.partitions_of(&member_id) {
            Some(owned) => Ok(JoinResponse {
                assigned_partitions: owned.iter().cloned().collect(),
                member_id,
                epoch: self.epoch,
            }),
            None => match &self.health {
                GroupHealth::Degraded { attempts, .. } if self.handles.contains_key(&member_id) => {
                    Err(CoordinatorError::GroupDegraded {
                        group_id: self.group_id.to_string(),
                        attempts: *attempts,
                    })
                }
                _ => Err(CoordinatorError::MemberRejected {
                    member_id: member_id.to_string(),
                    reason: "dropped during rebalance".to_string(),
                }),
            },
        }
    }

    /// Refresh liveness and check the member's epoch against the current one.
    pub fn heartbeat(
        &mut self,
        member_id: &MemberId,
        epoch: Epoch,
    ) -> Result<HeartbeatResponse, CoordinatorError> {
        self.roster.heartbeat(&self.group_id, member_id)?;

        if epoch < self.epoch {
            debug!(
                "Member '{member_id}' of group '{}' is at {epoch}, current {}",
                self.group_id, self.epoch
            );
            Ok(HeartbeatResponse::RejoinRequired { epoch: self.epoch })
        } else if epoch > self.epoch {
            Err(CoordinatorError::StaleEpoch {
                group_id: self.group_id.to_string(),
                member_id: member_id.to_string(),
                current_epoch: self.epoch.0,
                stale_epoch: epoch.0,
            })
        } else {
            Ok(HeartbeatResponse::Ok)
        }
    }

    pub async fn leave(&mut self, member_id: &MemberId) -> Result<LeaveResponse, CoordinatorError> {
        self.roster.leave(&self.group_id, member_id)?;
        self.handles.remove(member_id);
        self.rebalance("member left").await;
        Ok(LeaveResponse { ok: true })
    }

    pub fn fetch_assignment(&self, member_id: &MemberId) -> Result<AssignmentView, CoordinatorError> {
        if !self.handles.contains_key(member_id) {
            return Err(KeelError::UnknownMember {
                group_id: self.group_id.to_string(),
                member_id: member_id.to_string(),
            }
            .into());
        }
        Ok(AssignmentView {
            member_id: member_id.clone(),
            epoch: self.epoch,
            partitions: self
                .assignment
                .partitions_of(member_id)
                .map(|owned| owned.iter().cloned().collect())
                .unwrap_or_default(),
        })
    }

    /// Drop members whose session lapsed and rebalance if any were removed.
    pub async fn expire(&mut self, now: DateTime<Utc>) -> Vec<MemberId> {
        let removed =
            self.roster
                .expire_stale_in(&self.group_id, now, self.config.session_timeout());
        if removed.is_empty() {
            return removed;
        }
        for member in &removed {
            warn!(
                "Member '{member}' of group '{}' missed its session timeout",
                self.group_id
            );
            self.handles.remove(member);
        }
        self.rebalance("session expired").await;
        removed
    }

    pub async fn partitions_changed(&mut self) -> bool {
        self.rebalance_if_needed("partition count changed").await
    }

    pub async fn reconcile(&mut self) -> bool {
        self.rebalance_if_needed("reconciliation").await
    }

    async fn rebalance_if_needed(&mut self, reason: &str) -> bool {
        if self.needs_rebalance() {
            self.rebalance(reason).await;
            true
        } else {
            debug!(
                "Group '{}' unchanged at {}, skipping {reason}",
                self.group_id, self.epoch
            );
            false
        }
    }

    /// True when membership or partition count moved since the last rebalance,
    /// the group is degraded, or a fresh computation differs from what is held.
    pub fn needs_rebalance(&self) -> bool {
        let partitions = match self.catalog.partitions_of(&self.topic) {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!("Cannot read partitions for group '{}': {e}", self.group_id);
                return true;
            }
        };
        let version = self.roster.membership_version(&self.group_id);
        if self.snapshot != Some((version, partitions.len())) || self.health.is_degraded() {
            return true;
        }
        let expected = assign(self.strategy.as_ref(), &partitions, &self.eligible_members());
        expected != self.assignment
    }

    pub fn describe(&self) -> GroupDescription {
        GroupDescription {
            group_id: self.group_id.clone(),
            topic: self.topic.clone(),
            strategy: self.strategy.name().to_string(),
            state: self.state,
            health: self.health.clone(),
            epoch: self.epoch,
            members: self.eligible_members(),
            assignment: self.assignment.clone(),
        }
    }

    /// Run the revoke -> assign protocol, retrying with backoff until it
    /// succeeds or the retry budget is spent.
    pub async fn rebalance(&mut self, reason: &str) {
        let span = tracing::info_span!(
            "rebalance",
            group_id = %self.group_id,
            reason = %reason,
            epoch = tracing::field::Empty
        );
        self.rebalance_with_retries(reason).instrument(span).await
    }

    async fn rebalance_with_retries(&mut self, reason: &str) {
        info!("Rebalancing group '{}': {reason}", self.group_id);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.rebalance_once().await;
            self.state = RebalanceState::Stable;

            let e = match result {
                Ok(()) => {
                    self.health = GroupHealth::Healthy;
                    return;
                }
                Err(e) => e,
            };

            if attempt > self.config.max_rebalance_retries {
                error!(
                    "Group '{}' degraded after {attempt} failed rebalance attempts: {e}",
                    self.group_id
                );
                self.health = GroupHealth::Degraded {
                    attempts: attempt,
                    reason: e.to_string(),
                };
                return;
            }

            let backoff = self.config.retry_backoff(attempt);
            warn!(
                "Rebalance attempt {attempt} of group '{}' failed: {e}; retrying in {backoff:?}",
                self.group_id
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn rebalance_once(&mut self) -> Result<(), CoordinatorError> {
        // Catalog errors must surface before anything is revoked so the group
        // keeps its last assignment while degraded.
        let partitions = self.catalog.partitions_of(&self.topic)?;
        self.revoke_all().await;

        self.state = RebalanceState::Assigning;
        let members = self.eligible_members();
        let next = assign(self.strategy.as_ref(), &partitions, &members);
        next.verify(self.group_id.as_str(), &partitions, false)?;

        self.epoch = self.epoch.next();
        let epoch = self.epoch;
        tracing::Span::current().record("epoch", epoch.0);

        let commands: Vec<_> = next
            .iter()
            .filter_map(|(member, owned)| {
                self.handles.get(member).map(|handle| {
                    let command = AssignCommand {
                        group_id: self.group_id.clone(),
                        epoch,
                        partitions_to_own: owned.iter().cloned().collect(),
                    };
                    (member.clone(), Arc::clone(handle), command)
                })
            })
            .collect();

        let timeout = self.config.assign_ack_timeout();
        let results = join_all(commands.into_iter().map(|(member, handle, command)| async move {
            let result = tokio::time::timeout(timeout, handle.assign(command)).await;
            (member, result)
        }))
        .await;

        let mut committed = next;
        let mut first_failure = None;
        for (member, result) in results {
            match self.check_ack(&member, Phase::Assign, epoch, timeout, result) {
                Ok(()) => {
                    if let Err(e) = self.roster.heartbeat(&self.group_id, &member) {
                        debug!("Could not refresh '{member}' after assign ack: {e}");
                    }
                }
                Err(e) => {
                    warn!("Dropping member '{member}' from group '{}': {e}", self.group_id);
                    self.drop_member(&member);
                    committed.remove_member(&member);
                    first_failure.get_or_insert(e);
                }
            }
        }

        self.assignment = committed;
        self.snapshot = Some((
            self.roster.membership_version(&self.group_id),
            partitions.len(),
        ));
        info!(
            "Group '{}' committed {epoch} with {} member(s):\n{}",
            self.group_id,
            self.assignment.member_count(),
            self.assignment
        );

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tell every current owner to release all of its partitions. Members that
    /// fail to acknowledge are excluded from the group.
    async fn revoke_all(&mut self) {
        self.state = RebalanceState::Revoking;
        let epoch = self.epoch;

        let commands: Vec<_> = self
            .assignment
            .iter()
            .filter(|(_, owned)| !owned.is_empty())
            .filter_map(|(member, owned)| {
                self.handles.get(member).map(|handle| {
                    let command = RevokeCommand {
                        group_id: self.group_id.clone(),
                        epoch,
                        partitions_to_release: owned.iter().cloned().collect(),
                    };
                    (member.clone(), Arc::clone(handle), command)
                })
            })
            .collect();

        if !commands.is_empty() {
            info!(
                "Group '{}' revoking partitions from {} member(s) at {epoch}",
                self.group_id,
                commands.len()
            );
        }

        let timeout = self.config.revoke_ack_timeout();
        let results = join_all(commands.into_iter().map(|(member, handle, command)| async move {
            let result = tokio::time::timeout(timeout, handle.revoke(command)).await;
            (member, result)
        }))
        .await;

        for (member, result) in results {
            if let Err(e) = self.check_ack(&member, Phase::Revoke, epoch, timeout, result) {
                warn!("Excluding member '{member}' from group '{}': {e}", self.group_id);
                self.drop_member(&member);
            }
        }

        self.assignment = Assignment::new();
    }

    fn check_ack(
        &self,
        member: &MemberId,
        phase: Phase,
        expected: Epoch,
        timeout: Duration,
        result: AckResult,
    ) -> Result<(), CoordinatorError> {
        match result {
            Err(_) => Err(CoordinatorError::RebalanceTimeout {
                group_id: self.group_id.to_string(),
                member_id: member.to_string(),
                phase: phase.as_str().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(ack)) if ack.epoch != expected => {
                Err(CoordinatorError::StaleEpoch {
                    group_id: self.group_id.to_string(),
                    member_id: member.to_string(),
                    current_epoch: expected.0,
                    stale_epoch: ack.epoch.0,
                })
            }
            Ok(Ok(_)) => Ok(()),
        }
    }

    fn drop_member(&mut self, member: &MemberId) {
        self.handles.remove(member);
        if let Err(e) = self.roster.leave(&self.group_id, member) {
            debug!("Member '{member}' already gone from roster: {e}");
        }
    }

    /// Roster members this coordinator can reach, sorted.
    fn eligible_members(&self) -> Vec<MemberId> {
        self.roster
            .members(&self.group_id)
            .into_iter()
            .filter(|member| self.handles.contains_key(member))
            .collect()
    }
}
