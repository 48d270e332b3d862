//! Membership roster: the live members of every consumer group.
//!
//! Members are kept sorted and deduplicated per group. Every join, leave and
//! expiry bumps the group's membership version; heartbeats do not.

use crate::{KeelError, types::*};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct GroupRoster {
    members: BTreeMap<MemberId, Member>,
    version: u64,
}

/// Thread-safe roster keyed by group id.
#[derive(Debug)]
pub struct MembershipRoster {
    groups: RwLock<HashMap<GroupId, GroupRoster>>,
    session_timeout: Duration,
}

impl MembershipRoster {
    /// `session_timeout` decides whether an existing entry is still live when the
    /// same member id joins again.
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            session_timeout,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn join(&self, group: &GroupId, member: &MemberId) -> Result<u64, KeelError> {
        self.join_at(group, member, Utc::now())
    }

    /// Add `member` to `group` and return the new membership version.
    ///
    /// Fails with [`KeelError::DuplicateMember`] if the member is already present
    /// with a live heartbeat. A stale entry is replaced.
    pub fn join_at(
        &self,
        group: &GroupId,
        member: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<u64, KeelError> {
        if !member.is_valid() {
            return Err(KeelError::invalid_input(
                "roster join",
                format!("malformed member id '{}'", member.as_str().escape_debug()),
            ));
        }

        let mut groups = self.groups.write();
        let roster = groups.entry(group.clone()).or_default();

        if let Some(existing) = roster.members.get(member) {
            if existing.is_live(now, self.session_timeout) {
                return Err(KeelError::DuplicateMember {
                    group_id: group.to_string(),
                    member_id: member.to_string(),
                });
            }
            debug!("Replacing stale entry for member '{member}' in group '{group}'");
        }

        roster
            .members
            .insert(member.clone(), Member::new(group.clone(), member.clone(), now));
        roster.version += 1;
        info!(
            "Member '{member}' joined group '{group}' (membership version {})",
            roster.version
        );
        Ok(roster.version)
    }

    pub fn heartbeat(&self, group: &GroupId, member: &MemberId) -> Result<(), KeelError> {
        self.heartbeat_at(group, member, Utc::now())
    }

    /// Refresh liveness of a joined member.
    pub fn heartbeat_at(
        &self,
        group: &GroupId,
        member: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<(), KeelError> {
        let mut groups = self.groups.write();
        let entry = groups
            .get_mut(group)
            .and_then(|roster| roster.members.get_mut(member))
            .ok_or_else(|| KeelError::UnknownMember {
                group_id: group.to_string(),
                member_id: member.to_string(),
            })?;
        entry.last_heartbeat = now;
        Ok(())
    }

    /// Explicit removal. Returns the new membership version.
    pub fn leave(&self, group: &GroupId, member: &MemberId) -> Result<u64, KeelError> {
        let mut groups = self.groups.write();
        let roster = groups
            .get_mut(group)
            .filter(|roster| roster.members.contains_key(member))
            .ok_or_else(|| KeelError::UnknownMember {
                group_id: group.to_string(),
                member_id: member.to_string(),
            })?;
        roster.members.remove(member);
        roster.version += 1;
        info!(
            "Member '{member}' left group '{group}' (membership version {})",
            roster.version
        );
        Ok(roster.version)
    }

    /// Remove members of `group` whose last heartbeat is older than `timeout`.
    pub fn expire_stale_in(
        &self,
        group: &GroupId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<MemberId> {
        let mut groups = self.groups.write();
        match groups.get_mut(group) {
            Some(roster) => Self::expire_roster(group, roster, now, timeout),
            None => Vec::new(),
        }
    }

    /// Remove stale members across every group; only groups that lost members appear.
    pub fn expire_stale(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> BTreeMap<GroupId, Vec<MemberId>> {
        let mut groups = self.groups.write();
        groups
            .iter_mut()
            .filter_map(|(group, roster)| {
                let removed = Self::expire_roster(group, roster, now, timeout);
                (!removed.is_empty()).then(|| (group.clone(), removed))
            })
            .collect()
    }

    fn expire_roster(
        group: &GroupId,
        roster: &mut GroupRoster,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<MemberId> {
        let stale: Vec<MemberId> = roster
            .members
            .values()
            .filter(|m| now.signed_duration_since(m.last_heartbeat) > timeout)
            .map(|m| m.member_id.clone())
            .collect();

        if !stale.is_empty() {
            for member in &stale {
                roster.members.remove(member);
            }
            roster.version += 1;
            info!(
                "Expired {} stale member(s) from group '{group}': {:?}",
                stale.len(),
                stale.iter().map(MemberId::as_str).collect::<Vec<_>>()
            );
        }
        stale
    }

    /// Sorted, deduplicated member ids of `group`.
    pub fn members(&self, group: &GroupId) -> Vec<MemberId> {
        self.groups
            .read()
            .get(group)
            .map(|roster| roster.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member(&self, group: &GroupId, member: &MemberId) -> Option<Member> {
        self.groups
            .read()
            .get(group)
            .and_then(|roster| roster.members.get(member).cloned())
    }

    pub fn contains(&self, group: &GroupId, member: &MemberId) -> bool {
        self.groups
            .read()
            .get(group)
            .is_some_and(|roster| roster.members.contains_key(member))
    }

    /// Mutation counter for `group`; 0 for a group that never had members.
    pub fn membership_version(&self, group: &GroupId) -> u64 {
        self.groups
            .read()
            .get(group)
            .map(|roster| roster.version)
            .unwrap_or(0)
    }

    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.read().keys().cloned().collect();
        groups.sort();
        groups
    }

    pub fn remove_group(&self, group: &GroupId) -> bool {
        self.groups.write().remove(group).is_some()
    }
}
