use crate::WorkerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TASK: &str = "queue-consumer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Capacity of each partition queue.
    pub queue_capacity: usize,
    /// Items fetched per partition per cycle.
    pub batch_size: usize,
    /// Failed attempts an item may accumulate before it is dead-lettered.
    pub max_retries: u32,
    pub dead_letter_capacity: usize,
    /// Idle wait between cycles when nothing was fetched.
    pub poll_interval_ms: u64,
    /// How often a joined worker heartbeats; keep it below the coordinator's
    /// session timeout.
    pub heartbeat_interval_ms: u64,
    /// Registry name of the task this worker runs.
    pub task: String,
    /// Free-form value handed to the task in every `ShardContext`.
    pub shard_parameter: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            batch_size: 50,
            max_retries: 3,
            dead_letter_capacity: 1024,
            poll_interval_ms: 100,
            heartbeat_interval_ms: 3_000,
            task: DEFAULT_TASK.to_string(),
            shard_parameter: None,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.queue_capacity == 0 {
            return Err(WorkerError::invalid_config("queue_capacity must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(WorkerError::invalid_config("batch_size must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(WorkerError::invalid_config("max_retries must be at least one"));
        }
        if self.dead_letter_capacity == 0 {
            return Err(WorkerError::invalid_config(
                "dead_letter_capacity must be greater than zero",
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(WorkerError::invalid_config(
                "heartbeat_interval_ms must be greater than zero",
            ));
        }
        if self.task.is_empty() {
            return Err(WorkerError::invalid_config("task name is empty"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
