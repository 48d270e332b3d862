//! Bounded per-partition work queues and the dead-letter store.
//!
//! Every item travels in an [`Envelope`] that counts its failed attempts, so
//! retry decisions are explicit rather than an implicit requeue loop.

use crate::{WorkerError, config::WorkerConfig};
use keel::Partition;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub item: T,
    /// Failed processing attempts so far.
    pub attempts: u32,
}

impl<T> Envelope<T> {
    pub fn new(item: T) -> Self {
        Self { item, attempts: 0 }
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<Envelope<T>>,
    closed: bool,
}

/// FIFO queue for one partition with a hard capacity.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    partition: Partition,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    space: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(partition: Partition, capacity: usize) -> Self {
        Self {
            partition,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            space: Notify::new(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn offer(&self, envelope: Envelope<T>) -> Result<(), (WorkerError, Envelope<T>)> {
        let mut state = self.state.lock();
        if state.closed {
            let error = WorkerError::QueueClosed {
                partition: self.partition.clone(),
            };
            return Err((error, envelope));
        }
        if state.items.len() >= self.capacity {
            let error = WorkerError::QueueFull {
                partition: self.partition.clone(),
                capacity: self.capacity,
            };
            return Err((error, envelope));
        }
        state.items.push_back(envelope);
        Ok(())
    }

    /// Enqueue without waiting; `QueueFull` is the backpressure signal.
    pub fn try_push(&self, envelope: Envelope<T>) -> Result<(), WorkerError> {
        self.offer(envelope).map_err(|(error, _)| error)
    }

    /// Enqueue, waiting for space while the queue is full.
    pub async fn push(&self, mut envelope: Envelope<T>) -> Result<(), WorkerError> {
        loop {
            let mut notified = pin!(self.space.notified());
            notified.as_mut().enable();

            match self.offer(envelope) {
                Ok(()) => return Ok(()),
                Err((WorkerError::QueueFull { .. }, returned)) => {
                    envelope = returned;
                    notified.await;
                }
                Err((error, _)) => return Err(error),
            }
        }
    }

    /// Take up to `max` items from the head.
    pub fn pop_batch(&self, max: usize) -> Vec<Envelope<T>> {
        let batch: Vec<Envelope<T>> = {
            let mut state = self.state.lock();
            let take = max.min(state.items.len());
            state.items.drain(..take).collect()
        };
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    /// Put retried items back at the head, keeping their relative order.
    /// They held a slot when popped, so capacity is not checked.
    pub fn requeue_front(&self, envelopes: Vec<Envelope<T>>) {
        let mut state = self.state.lock();
        for envelope in envelopes.into_iter().rev() {
            state.items.push_front(envelope);
        }
    }

    /// Reject further pushes and wake every waiting producer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.space.notify_waiters();
    }
}

/// One [`BoundedQueue`] per partition, created on first use.
#[derive(Debug)]
pub struct PartitionQueues<T> {
    capacity: usize,
    queues: RwLock<BTreeMap<Partition, Arc<BoundedQueue<T>>>>,
}

impl<T> PartitionQueues<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: RwLock::new(BTreeMap::new()),
        }
    }

    /// Queues sized by `config.queue_capacity`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.queue_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn queue(&self, partition: &Partition) -> Arc<BoundedQueue<T>> {
        if let Some(queue) = self.queues.read().get(partition) {
            return Arc::clone(queue);
        }
        let mut queues = self.queues.write();
        let queue = queues.entry(partition.clone()).or_insert_with(|| {
            debug!("Creating queue for partition {partition}");
            Arc::new(BoundedQueue::new(partition.clone(), self.capacity))
        });
        Arc::clone(queue)
    }

    pub fn get(&self, partition: &Partition) -> Option<Arc<BoundedQueue<T>>> {
        self.queues.read().get(partition).cloned()
    }

    pub fn try_push(&self, partition: &Partition, item: T) -> Result<(), WorkerError> {
        self.queue(partition).try_push(Envelope::new(item))
    }

    pub async fn push(&self, partition: &Partition, item: T) -> Result<(), WorkerError> {
        self.queue(partition).push(Envelope::new(item)).await
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.queues.read().keys().cloned().collect()
    }

    /// Items waiting across every partition.
    pub fn total_len(&self) -> usize {
        self.queues.read().values().map(|queue| queue.len()).sum()
    }

    pub fn close_all(&self) {
        for queue in self.queues.read().values() {
            queue.close();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter<T> {
    pub partition: Partition,
    pub item: T,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug)]
struct DeadLetterState<T> {
    entries: VecDeque<DeadLetter<T>>,
    evicted: u64,
}

/// Items that spent their retry budget. Bounded: overflow evicts the oldest.
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    capacity: usize,
    state: Mutex<DeadLetterState<T>>,
}

impl<T> DeadLetterQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(DeadLetterState {
                entries: VecDeque::new(),
                evicted: 0,
            }),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.dead_letter_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, partition: Partition, envelope: Envelope<T>, reason: impl Into<String>) {
        let letter = DeadLetter {
            partition,
            item: envelope.item,
            attempts: envelope.attempts,
            reason: reason.into(),
        };
        let mut state = self.state.lock();
        if state.entries.len() >= self.capacity {
            if let Some(oldest) = state.entries.pop_front() {
                warn!(
                    "Dead-letter queue full ({}), dropping oldest entry from partition {}",
                    self.capacity, oldest.partition
                );
            }
            state.evicted += 1;
        }
        state.entries.push_back(letter);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Entries dropped because the queue was full.
    pub fn evicted(&self) -> u64 {
        self.state.lock().evicted
    }

    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        self.state.lock().entries.drain(..).collect()
    }
}
