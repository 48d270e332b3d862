//! Static strategy: operator-pinned ownership.
//!
//! A partition pinned to several present members goes to the one that sorts
//! first. Partitions nobody present has pinned are spread over all present
//! members with the averaging rule, so every partition still has exactly one
//! owner. Pinned sets are taken as given and may be unbalanced.

use super::{AssignmentStrategy, AveragingStrategy};
use crate::types::{MemberId, Partition, PartitionId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct StaticStrategy {
    pins: BTreeMap<MemberId, BTreeSet<PartitionId>>,
}

impl StaticStrategy {
    pub fn new(pins: BTreeMap<MemberId, BTreeSet<PartitionId>>) -> Self {
        Self { pins }
    }

    /// Build from the configuration form: member id -> partition ids.
    pub fn from_config(mapping: &BTreeMap<String, Vec<u32>>) -> Self {
        let pins = mapping
            .iter()
            .map(|(member, ids)| {
                (
                    MemberId::new_unchecked(member.as_str()),
                    ids.iter().copied().map(PartitionId).collect(),
                )
            })
            .collect();
        Self { pins }
    }

    pub fn pins(&self) -> &BTreeMap<MemberId, BTreeSet<PartitionId>> {
        &self.pins
    }

    fn pinned_owner(&self, partition: &Partition, members: &[MemberId]) -> Option<usize> {
        members.iter().position(|member| {
            self.pins
                .get(member)
                .is_some_and(|ids| ids.contains(&partition.partition_id))
        })
    }
}

impl AssignmentStrategy for StaticStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn allocate(
        &self,
        partitions: &[Partition],
        members: &[MemberId],
        index: usize,
    ) -> Vec<Partition> {
        if index >= members.len() {
            return Vec::new();
        }

        let mut owned = Vec::new();
        let mut leftover = Vec::new();
        for partition in partitions {
            match self.pinned_owner(partition, members) {
                Some(owner) if owner == index => owned.push(partition.clone()),
                Some(_) => {}
                None => leftover.push(partition.clone()),
            }
        }

        owned.extend(AveragingStrategy::new().allocate(&leftover, members, index));
        owned.sort();
        owned
    }
}
