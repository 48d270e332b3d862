//! Member-side consumption for keel consumer groups.
//!
//! A [`Worker`] joins a group through the coordinator, obeys its revoke and
//! assign commands, and runs a [`ShardedTask`] over the partitions it owns.
//! Producers feed bounded per-partition queues through [`QueueProducer`].

pub mod config;
pub mod error;
pub mod producer;
pub mod queue;
pub mod task;
pub mod worker;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use producer::QueueProducer;
pub use queue::{BoundedQueue, DeadLetter, DeadLetterQueue, Envelope, PartitionQueues};
pub use task::{ItemOutcome, QueueConsumerTask, ShardContext, ShardedTask, TaskRegistry};
pub use worker::{RetryDecision, RetryPolicy, Worker, WorkerStats};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
