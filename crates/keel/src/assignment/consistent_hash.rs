//! Consistent-hash strategy.
//!
//! Every member contributes `virtual_nodes` points to a murmur2 ring and each
//! partition belongs to the first point at or after its own hash, wrapping
//! around. Adding a member only moves partitions onto that member, so churn is
//! limited to what the newcomer takes over. Balance is not guaranteed.

use super::{AssignmentStrategy, DEFAULT_VIRTUAL_NODES};
use crate::types::{MemberId, Partition};
use murmur2::{KAFKA_SEED, murmur2};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct ConsistentHashStrategy {
    virtual_nodes: u32,
}

impl Default for ConsistentHashStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl ConsistentHashStrategy {
    /// A value of 0 is treated as 1.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    /// Ring point -> index into `members`. On a hash collision the member that
    /// sorts first keeps the point.
    fn build_ring(&self, members: &[MemberId]) -> BTreeMap<u32, usize> {
        let mut ring = BTreeMap::new();
        for (index, member) in members.iter().enumerate() {
            for replica in 0..self.virtual_nodes {
                let key = format!("{member}#{replica}");
                ring.entry(murmur2(key.as_bytes(), KAFKA_SEED))
                    .or_insert(index);
            }
        }
        ring
    }

    fn owner(ring: &BTreeMap<u32, usize>, partition: &Partition) -> Option<usize> {
        let key = format!("{}-{}", partition.topic, partition.partition_id);
        let hash = murmur2(key.as_bytes(), KAFKA_SEED);
        ring.range(hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, index)| *index)
    }
}

impl AssignmentStrategy for ConsistentHashStrategy {
    fn name(&self) -> &'static str {
        "consistent_hash"
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
        let ring = self.build_ring(members);
        partitions
            .iter()
            .filter(|p| Self::owner(&ring, p) == Some(index))
            .cloned()
            .collect()
    }

    fn allocate_all(&self, partitions: &[Partition], members: &[MemberId]) -> Vec<Vec<Partition>> {
        let mut owned = vec![Vec::new(); members.len()];
        let ring = self.build_ring(members);
        for partition in partitions {
            if let Some(index) = Self::owner(&ring, partition) {
                owned[index].push(partition.clone());
            }
        }
        owned
    }
}
