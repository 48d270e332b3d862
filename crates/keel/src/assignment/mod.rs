//! Partition assignment strategies.
//!
//! A strategy is a pure function of the ordered partition list, the sorted member
//! list and the index of the member being assigned. [`assign`] drives a strategy
//! over every member so idle members are recorded with an explicit empty set.
//!
//! - **Averaging**: contiguous blocks, remainder front-loaded (default)
//! - **Circular**: member `i` takes every `M`-th partition starting at `i`
//! - **ConsistentHash**: murmur2 ring, minimal movement under churn
//! - **Static**: operator-pinned mapping with an averaging fallback

pub mod averaging;
pub mod circular;
pub mod consistent_hash;
pub mod static_config;

pub use averaging::AveragingStrategy;
pub use circular::CircularStrategy;
pub use consistent_hash::ConsistentHashStrategy;
pub use static_config::StaticStrategy;

use crate::{KeelError, types::*};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Default number of ring points per member for the consistent-hash strategy.
pub const DEFAULT_VIRTUAL_NODES: u32 = 10;

/// Trait for partition assignment strategies.
///
/// Implementations must be deterministic: the same `partitions` and sorted
/// `members` always yield the same result for a given `index`.
pub trait AssignmentStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Partitions owned by `members[index]`.
    fn allocate(&self, partitions: &[Partition], members: &[MemberId], index: usize)
    -> Vec<Partition>;

    /// Partitions for every member, in `members` order. Strategies with
    /// per-call setup override this to do the setup once.
    fn allocate_all(&self, partitions: &[Partition], members: &[MemberId]) -> Vec<Vec<Partition>> {
        (0..members.len())
            .map(|index| self.allocate(partitions, members, index))
            .collect()
    }
}

/// Released and acquired partitions of one member between two assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Movement {
    pub released: BTreeSet<Partition>,
    pub acquired: BTreeSet<Partition>,
}

impl Movement {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.acquired.is_empty()
    }
}

/// Mapping member id -> owned partitions for one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    members: BTreeMap<MemberId, BTreeSet<Partition>>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, member: MemberId, partitions: impl IntoIterator<Item = Partition>) {
        self.members
            .insert(member, partitions.into_iter().collect());
    }

    pub fn remove_member(&mut self, member: &MemberId) -> Option<BTreeSet<Partition>> {
        self.members.remove(member)
    }

    pub fn partitions_of(&self, member: &MemberId) -> Option<&BTreeSet<Partition>> {
        self.members.get(member)
    }

    pub fn owner_of(&self, partition: &Partition) -> Option<&MemberId> {
        self.members
            .iter()
            .find(|(_, owned)| owned.contains(partition))
            .map(|(member, _)| member)
    }

    /// Member ids in sorted order, idle members included.
    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.members.keys()
    }

    pub fn contains_member(&self, member: &MemberId) -> bool {
        self.members.contains_key(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &BTreeSet<Partition>)> {
        self.members.iter()
    }

    /// Members recorded as owning nothing.
    pub fn idle_members(&self) -> Vec<&MemberId> {
        self.members
            .iter()
            .filter(|(_, owned)| owned.is_empty())
            .map(|(member, _)| member)
            .collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.members.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Per-member changes needed to go from `self` to `next`; unchanged members are omitted.
    pub fn movements(&self, next: &Assignment) -> BTreeMap<MemberId, Movement> {
        let empty = BTreeSet::new();
        let members: BTreeSet<&MemberId> = self.members.keys().chain(next.members.keys()).collect();

        members
            .into_iter()
            .filter_map(|member| {
                let before = self.members.get(member).unwrap_or(&empty);
                let after = next.members.get(member).unwrap_or(&empty);
                let movement = Movement {
                    released: before.difference(after).cloned().collect(),
                    acquired: after.difference(before).cloned().collect(),
                };
                (!movement.is_empty()).then(|| (member.clone(), movement))
            })
            .collect()
    }

    /// Check completeness and disjointness against `partitions`, and balance when
    /// `balanced` is set.
    pub fn verify(
        &self,
        group_id: &str,
        partitions: &[Partition],
        balanced: bool,
    ) -> Result<(), KeelError> {
        let violation = |reason: String| KeelError::InvariantViolation {
            group_id: group_id.to_string(),
            reason,
        };

        if self.members.is_empty() {
            return Ok(());
        }

        let expected: BTreeSet<&Partition> = partitions.iter().collect();
        let mut seen: BTreeMap<&Partition, &MemberId> = BTreeMap::new();
        for (member, owned) in &self.members {
            for partition in owned {
                if !expected.contains(partition) {
                    return Err(violation(format!(
                        "member '{member}' owns unknown partition {partition}"
                    )));
                }
                if let Some(other) = seen.insert(partition, member) {
                    return Err(violation(format!(
                        "partition {partition} owned by both '{other}' and '{member}'"
                    )));
                }
            }
        }

        if let Some(missing) = expected.iter().find(|p| !seen.contains_key(*p)) {
            return Err(violation(format!("partition {missing} is unassigned")));
        }

        if balanced {
            let sizes = self.members.values().map(BTreeSet::len);
            let max = sizes.clone().max().unwrap_or(0);
            let min = sizes.min().unwrap_or(0);
            if max - min > 1 {
                return Err(violation(format!(
                    "unbalanced assignment: largest set {max}, smallest set {min}"
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (member, owned) in &self.members {
            let ids: Vec<String> = owned.iter().map(|p| p.partition_id.to_string()).collect();
            writeln!(f, "{member}: [{}]", ids.join(", "))?;
        }
        Ok(())
    }
}

/// Run `strategy` for every member, rejecting unusable input.
///
/// Members are sorted and deduplicated first. With no members the result is empty.
pub fn try_assign(
    strategy: &dyn AssignmentStrategy,
    partitions: &[Partition],
    members: &[MemberId],
) -> Result<Assignment, KeelError> {
    if partitions.is_empty() {
        return Err(KeelError::invalid_input(
            "assignment",
            "partition catalog is empty",
        ));
    }
    if let Some(bad) = members.iter().find(|m| !m.is_valid()) {
        return Err(KeelError::invalid_input(
            "assignment",
            format!("malformed member id '{}'", bad.as_str().escape_debug()),
        ));
    }

    let mut sorted = members.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut assignment = Assignment::new();
    let allocations = strategy.allocate_all(partitions, &sorted);
    for (member, owned) in sorted.iter().zip(allocations) {
        assignment.insert(member.clone(), owned);
    }

    debug!(
        "Strategy '{}' assigned {} partitions across {} members",
        strategy.name(),
        assignment.assigned_count(),
        assignment.member_count()
    );
    Ok(assignment)
}

/// Like [`try_assign`], but recovers from invalid input with an empty assignment.
pub fn assign(
    strategy: &dyn AssignmentStrategy,
    partitions: &[Partition],
    members: &[MemberId],
) -> Assignment {
    match try_assign(strategy, partitions, members) {
        Ok(assignment) => assignment,
        Err(e) => {
            warn!("Returning empty assignment: {e}");
            Assignment::new()
        }
    }
}

/// Configured strategy variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Averaging,
    Circular,
    #[serde(alias = "consistentHash")]
    ConsistentHash,
    Static,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Averaging => "averaging",
            StrategyKind::Circular => "circular",
            StrategyKind::ConsistentHash => "consistent_hash",
            StrategyKind::Static => "static",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "averaging" => Ok(StrategyKind::Averaging),
            "circular" | "round_robin" | "roundrobin" => Ok(StrategyKind::Circular),
            "consistent_hash" | "consistenthash" => Ok(StrategyKind::ConsistentHash),
            "static" => Ok(StrategyKind::Static),
            other => Err(KeelError::invalid_input(
                "strategy name",
                format!("unknown assignment strategy '{other}'"),
            )),
        }
    }
}

/// Everything needed to build a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
    /// Member id -> pinned partition ids, used by [`StrategyKind::Static`].
    #[serde(default)]
    pub static_assignment: BTreeMap<String, Vec<u32>>,
}

fn default_virtual_nodes() -> u32 {
    DEFAULT_VIRTUAL_NODES
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            static_assignment: BTreeMap::new(),
        }
    }
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

pub fn create_strategy(config: &StrategyConfig) -> Box<dyn AssignmentStrategy> {
    match config.kind {
        StrategyKind::Averaging => Box::new(AveragingStrategy::new()),
        StrategyKind::Circular => Box::new(CircularStrategy::new()),
        StrategyKind::ConsistentHash => {
            Box::new(ConsistentHashStrategy::new(config.virtual_nodes))
        }
        StrategyKind::Static => Box::new(StaticStrategy::from_config(&config.static_assignment)),
    }
}
