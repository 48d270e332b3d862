//! Read-only view of a topic's ordered partitions.
//!
//! The assignment engine only reads the catalog. Provisioning operations on
//! [`InMemoryPartitionCatalog`] stand in for the external collaborator that owns
//! topics; changing a partition count never triggers a rebalance by itself, the
//! coordinator has to be told (or notice on its reconciliation sweep).

use crate::{KeelError, types::*};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Topic provisioning description: partitions are spread over `brokers` in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub brokers: Vec<BrokerId>,
    pub partition_count: u32,
}

pub trait PartitionCatalog: Send + Sync {
    /// Partitions of `topic`, ascending by partition id.
    fn partitions_of(&self, topic: &str) -> Result<Vec<Partition>, KeelError>;

    fn partition_count(&self, topic: &str) -> Result<usize, KeelError> {
        Ok(self.partitions_of(topic)?.len())
    }

    /// Names of all known topics, sorted.
    fn topics(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
struct CatalogState {
    topics: BTreeMap<String, TopicPartitions>,
}

#[derive(Debug, Clone)]
struct TopicPartitions {
    brokers: Vec<BrokerId>,
    partitions: Vec<Partition>,
}

impl TopicPartitions {
    fn extend(&mut self, topic: &str, additional: u32) -> Result<(), KeelError> {
        let start = u32::try_from(self.partitions.len()).unwrap_or(u32::MAX);
        let end = start.checked_add(additional).ok_or_else(|| {
            KeelError::invalid_input(
                "topic provisioning",
                format!("topic '{topic}' cannot grow by {additional} partitions past id {start}"),
            )
        })?;
        for id in start..end {
            let broker = self.brokers[id as usize % self.brokers.len()];
            self.partitions
                .push(Partition::new(topic, broker, PartitionId(id)));
        }
        Ok(())
    }
}

/// Thread-safe in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPartitionCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryPartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics(topics: impl IntoIterator<Item = TopicSpec>) -> Result<Self, KeelError> {
        let catalog = Self::new();
        for spec in topics {
            catalog.provision_topic(&spec.name, spec.brokers, spec.partition_count)?;
        }
        Ok(catalog)
    }

    /// Create (or replace) `topic` with `partition_count` partitions over `brokers`.
    pub fn provision_topic(
        &self,
        topic: &str,
        brokers: Vec<BrokerId>,
        partition_count: u32,
    ) -> Result<(), KeelError> {
        if topic.is_empty() {
            return Err(KeelError::invalid_input("topic provisioning", "topic name is empty"));
        }
        if brokers.is_empty() {
            return Err(KeelError::invalid_input(
                "topic provisioning",
                format!("topic '{topic}' has no brokers"),
            ));
        }
        if partition_count == 0 {
            return Err(KeelError::invalid_input(
                "topic provisioning",
                format!("topic '{topic}' needs at least one partition"),
            ));
        }

        let mut entry = TopicPartitions {
            brokers,
            partitions: Vec::with_capacity(partition_count as usize),
        };
        entry.extend(topic, partition_count)?;

        self.state.write().topics.insert(topic.to_string(), entry);
        debug!("Provisioned topic '{topic}' with {partition_count} partitions");
        Ok(())
    }

    /// Append `additional` partitions to an existing topic and return the new count.
    pub fn add_partitions(&self, topic: &str, additional: u32) -> Result<usize, KeelError> {
        let mut state = self.state.write();
        let entry = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| KeelError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        entry.extend(topic, additional)?;
        let count = entry.partitions.len();
        info!("Topic '{topic}' grew by {additional} partitions to {count}");
        Ok(count)
    }

    pub fn remove_topic(&self, topic: &str) -> bool {
        self.state.write().topics.remove(topic).is_some()
    }
}

impl PartitionCatalog for InMemoryPartitionCatalog {
    fn partitions_of(&self, topic: &str) -> Result<Vec<Partition>, KeelError> {
        let state = self.state.read();
        state
            .topics
            .get(topic)
            .map(|entry| entry.partitions.clone())
            .ok_or_else(|| KeelError::TopicNotFound {
                topic: topic.to_string(),
            })
    }

    fn partition_count(&self, topic: &str) -> Result<usize, KeelError> {
        let state = self.state.read();
        state
            .topics
            .get(topic)
            .map(|entry| entry.partitions.len())
            .ok_or_else(|| KeelError::TopicNotFound {
                topic: topic.to_string(),
            })
    }

    fn topics(&self) -> Vec<String> {
        self.state.read().topics.keys().cloned().collect()
    }
}
