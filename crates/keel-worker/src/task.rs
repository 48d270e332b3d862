//! The unit of work a worker runs against each owned partition.
//!
//! Tasks are selected by name from a [`TaskRegistry`] according to
//! `WorkerConfig::task`.

use crate::{
    WorkerError,
    queue::{Envelope, PartitionQueues},
};
use async_trait::async_trait;
use keel::{Epoch, GroupId, MemberId, Partition};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a task knows about the shard it is working on.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardContext {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub epoch: Epoch,
    pub partition: Partition,
    /// Position of `partition` among the member's owned partitions.
    pub shard_index: usize,
    pub shard_total: usize,
    pub parameter: Option<String>,
}

/// Result of processing one item; outcomes line up with the input batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Done,
    Failed { reason: String },
}

impl ItemOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ItemOutcome::Failed {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ShardedTask<T: Send + Sync + 'static>: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `max` items for `ctx.partition`. An empty batch means idle.
    async fn fetch_batch(
        &self,
        ctx: &ShardContext,
        max: usize,
    ) -> Result<Vec<Envelope<T>>, WorkerError>;

    async fn process(&self, ctx: &ShardContext, items: &[Envelope<T>]) -> Vec<ItemOutcome>;

    /// Return items that will be retried to wherever `fetch_batch` reads from.
    async fn requeue(
        &self,
        ctx: &ShardContext,
        items: Vec<Envelope<T>>,
    ) -> Result<(), WorkerError>;
}

/// Tasks by name.
pub struct TaskRegistry<T: Send + Sync + 'static> {
    tasks: BTreeMap<String, Arc<dyn ShardedTask<T>>>,
}

impl<T: Send + Sync + 'static> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> TaskRegistry<T> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Register `task` under its own name, replacing any previous one.
    pub fn register(&mut self, task: Arc<dyn ShardedTask<T>>) {
        let name = task.name().to_string();
        if self.tasks.insert(name.clone(), task).is_some() {
            info!("Replaced task '{name}' in registry");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ShardedTask<T>>, WorkerError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownTask {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for TaskRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

type ItemHandler<T> = dyn Fn(&ShardContext, &T) -> Result<(), String> + Send + Sync;

/// Drains the partition queues a member owns and runs a handler per item.
pub struct QueueConsumerTask<T> {
    name: String,
    queues: Arc<PartitionQueues<T>>,
    handler: Box<ItemHandler<T>>,
}

impl<T: Send + Sync + 'static> QueueConsumerTask<T> {
    pub fn new(
        name: impl Into<String>,
        queues: Arc<PartitionQueues<T>>,
        handler: impl Fn(&ShardContext, &T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            queues,
            handler: Box::new(handler),
        }
    }

    pub fn queues(&self) -> &Arc<PartitionQueues<T>> {
        &self.queues
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ShardedTask<T> for QueueConsumerTask<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_batch(
        &self,
        ctx: &ShardContext,
        max: usize,
    ) -> Result<Vec<Envelope<T>>, WorkerError> {
        let Some(queue) = self.queues.get(&ctx.partition) else {
            return Ok(Vec::new());
        };
        let batch = queue.pop_batch(max);
        if !batch.is_empty() {
            debug!(
                "Shard {}/{} of '{}' fetched {} item(s) from {}",
                ctx.shard_index,
                ctx.shard_total,
                ctx.member_id,
                batch.len(),
                ctx.partition
            );
        }
        Ok(batch)
    }

    async fn process(&self, ctx: &ShardContext, items: &[Envelope<T>]) -> Vec<ItemOutcome> {
        items
            .iter()
            .map(|envelope| match (self.handler)(ctx, &envelope.item) {
                Ok(()) => ItemOutcome::Done,
                Err(reason) => ItemOutcome::Failed { reason },
            })
            .collect()
    }

    async fn requeue(
        &self,
        ctx: &ShardContext,
        items: Vec<Envelope<T>>,
    ) -> Result<(), WorkerError> {
        self.queues.queue(&ctx.partition).requeue_front(items);
        Ok(())
    }
}
