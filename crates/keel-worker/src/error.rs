use keel::{KeelError, Partition};
use keel_coordinator::CoordinatorError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// Backpressure: the partition queue is at capacity.
    QueueFull {
        partition: Partition,
        capacity: usize,
    },
    QueueClosed {
        partition: Partition,
    },
    TaskFailed {
        task: String,
        reason: String,
    },
    UnknownTask {
        name: String,
    },
    Coordinator(CoordinatorError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::QueueFull {
                partition,
                capacity,
            } => write!(f, "Queue for partition {partition} is full ({capacity} items)"),
            WorkerError::QueueClosed { partition } => {
                write!(f, "Queue for partition {partition} is closed")
            }
            WorkerError::TaskFailed { task, reason } => {
                write!(f, "Task '{task}' failed: {reason}")
            }
            WorkerError::UnknownTask { name } => write!(f, "No task registered as '{name}'"),
            WorkerError::Coordinator(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Coordinator(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoordinatorError> for WorkerError {
    fn from(e: CoordinatorError) -> Self {
        WorkerError::Coordinator(e)
    }
}

impl From<KeelError> for WorkerError {
    fn from(e: KeelError) -> Self {
        WorkerError::Coordinator(CoordinatorError::from(e))
    }
}

impl WorkerError {
    /// True when the caller should wait and try again rather than give up.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, WorkerError::QueueFull { .. })
    }

    pub fn task_failed(task: &str, reason: impl Into<String>) -> Self {
        WorkerError::TaskFailed {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        WorkerError::Coordinator(CoordinatorError::invalid_config("worker config", reason))
    }
}
