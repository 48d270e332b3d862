//! Producer-side partition selection.
//!
//! - **RoundRobin**: per-selector cursor, wraps at the partition count
//! - **Key**: `murmur2(key) & 0x7fffffff mod N`, stable while `N` is unchanged
//! - **Direct**: caller-supplied index, no selection logic
//!
//! Key routing does not survive a change in partition count; a key may land on a
//! different partition once the topic grows.

use crate::{KeelError, types::Partition};
use murmur2::{KAFKA_SEED, murmur2};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode<'a> {
    RoundRobin,
    Key(&'a [u8]),
    Direct(usize),
}

/// Non-negative murmur2 hash of `key` using the Kafka seed.
pub fn key_hash(key: &[u8]) -> u32 {
    murmur2(key, KAFKA_SEED) & 0x7fff_ffff
}

/// Index of the partition `key` routes to among `partition_count` partitions,
/// or `None` when there are no partitions.
pub fn partition_for_key(key: &[u8], partition_count: usize) -> Option<usize> {
    (key_hash(key) as usize).checked_rem(partition_count)
}

#[derive(Debug, Default)]
pub struct PartitionSelector {
    cursor: AtomicUsize,
}

impl PartitionSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the round-robin cursor at `start` instead of 0.
    pub fn with_cursor(start: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(start),
        }
    }

    /// Pick an index in `0..partition_count`. `topic` only labels errors.
    pub fn select_index(
        &self,
        topic: &str,
        partition_count: usize,
        mode: SelectMode<'_>,
    ) -> Result<usize, KeelError> {
        if partition_count == 0 {
            return Err(KeelError::invalid_input(
                "partition selection",
                format!("topic '{topic}' has no partitions"),
            ));
        }

        match mode {
            SelectMode::RoundRobin => {
                Ok(self.cursor.fetch_add(1, Ordering::Relaxed) % partition_count)
            }
            SelectMode::Key(key) => Ok(key_hash(key) as usize % partition_count),
            SelectMode::Direct(index) if index < partition_count => Ok(index),
            SelectMode::Direct(index) => Err(KeelError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition: u32::try_from(index).unwrap_or(u32::MAX),
                partition_count,
            }),
        }
    }

    /// Pick one of `partitions`, which must all belong to the same topic.
    pub fn select<'p>(
        &self,
        partitions: &'p [Partition],
        mode: SelectMode<'_>,
    ) -> Result<&'p Partition, KeelError> {
        let topic = partitions.first().map(|p| p.topic.as_str()).unwrap_or("");
        let index = self.select_index(topic, partitions.len(), mode)?;
        Ok(&partitions[index])
    }
}
