use crate::{WorkerError, queue::PartitionQueues};
use keel::{Partition, PartitionCatalog, PartitionSelector, SelectMode};
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

/// Routes items of one topic into its partition queues.
#[derive(Debug)]
pub struct QueueProducer<T> {
    topic: String,
    partitions: RwLock<Vec<Partition>>,
    queues: Arc<PartitionQueues<T>>,
    selector: PartitionSelector,
}

impl<T> QueueProducer<T> {
    pub fn new(
        catalog: &dyn PartitionCatalog,
        topic: &str,
        queues: Arc<PartitionQueues<T>>,
    ) -> Result<Self, WorkerError> {
        let partitions = catalog.partitions_of(topic)?;
        Ok(Self {
            topic: topic.to_string(),
            partitions: RwLock::new(partitions),
            queues,
            selector: PartitionSelector::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    /// Re-read the topic's partitions, e.g. after it grew. Returns the new count.
    pub fn refresh(&self, catalog: &dyn PartitionCatalog) -> Result<usize, WorkerError> {
        let partitions = catalog.partitions_of(&self.topic)?;
        let count = partitions.len();
        *self.partitions.write() = partitions;
        debug!("Producer for '{}' now routes over {count} partitions", self.topic);
        Ok(count)
    }

    fn route(&self, mode: SelectMode<'_>) -> Result<Partition, WorkerError> {
        let partitions = self.partitions.read();
        Ok(self.selector.select(&partitions, mode)?.clone())
    }

    /// Enqueue without waiting. Returns the partition the item went to.
    pub fn try_send(&self, item: T, mode: SelectMode<'_>) -> Result<Partition, WorkerError> {
        let partition = self.route(mode)?;
        self.queues.try_push(&partition, item)?;
        Ok(partition)
    }

    /// Enqueue, waiting while the target partition's queue is full.
    pub async fn send(&self, item: T, mode: SelectMode<'_>) -> Result<Partition, WorkerError> {
        let partition = self.route(mode)?;
        self.queues.push(&partition, item).await?;
        Ok(partition)
    }
}
