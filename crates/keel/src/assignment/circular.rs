//! Circular strategy: member `i` takes partitions `i, i+M, i+2M, …`.

use super::AssignmentStrategy;
use crate::types::{MemberId, Partition};

#[derive(Debug, Clone, Copy, Default)]
pub struct CircularStrategy;

impl CircularStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl AssignmentStrategy for CircularStrategy {
    fn name(&self) -> &'static str {
        "circular"
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
        partitions
            .iter()
            .skip(index)
            .step_by(members.len())
            .cloned()
            .collect()
    }
}
