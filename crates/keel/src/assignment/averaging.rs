//! Averaging strategy: contiguous blocks with the remainder front-loaded.
//!
//! With `N` partitions and `M` sorted members, the first `N mod M` members take
//! `N div M + 1` partitions and the rest take `N div M`. For 8 partitions and 3
//! members this gives `{0,1,2}`, `{3,4,5}`, `{6,7}`.

use super::AssignmentStrategy;
use crate::types::{MemberId, Partition};

#[derive(Debug, Clone, Copy, Default)]
pub struct AveragingStrategy;

impl AveragingStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl AssignmentStrategy for AveragingStrategy {
    fn name(&self) -> &'static str {
        "averaging"
    }

    fn allocate(
        &self,
        partitions: &[Partition],
        members: &[MemberId],
        index: usize,
    ) -> Vec<Partition> {
        let n = partitions.len();
        let m = members.len();
        if n == 0 || index >= m {
            return Vec::new();
        }

        let remainder = n % m;
        let average = n / m;
        let (size, start) = if index < remainder {
            (average + 1, index * (average + 1))
        } else {
            (average, index * average + remainder)
        };

        (0..size)
            .map(|k| partitions[(start + k) % n].clone())
            .collect()
    }
}
