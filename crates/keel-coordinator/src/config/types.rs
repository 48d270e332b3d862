//! Coordinator knobs and the cluster manifest describing topics and groups.

use crate::CoordinatorError;
use keel::{
    GroupId, InMemoryPartitionCatalog, StrategyConfig, StrategyKind, TopicSpec,
    assignment::DEFAULT_VIRTUAL_NODES,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Timeouts, retry policy and strategy selection shared by every group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub heartbeat_interval_ms: u64,
    pub session_timeout_ms: u64,
    pub revoke_ack_timeout_ms: u64,
    pub assign_ack_timeout_ms: u64,
    pub assignment_strategy: StrategyKind,
    pub max_rebalance_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    /// Periodic reconciliation sweep; `None` disables it.
    pub reconcile_interval_ms: Option<u64>,
    pub virtual_nodes: u32,
    /// Member id -> pinned partition ids for the static strategy.
    pub static_assignment: BTreeMap<String, Vec<u32>>,
    /// Capacity of each group's event queue.
    pub event_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 3_000,
            session_timeout_ms: 10_000,
            revoke_ack_timeout_ms: 5_000,
            assign_ack_timeout_ms: 5_000,
            assignment_strategy: StrategyKind::Averaging,
            max_rebalance_retries: 3,
            retry_backoff_ms: 200,
            max_retry_backoff_ms: 5_000,
            reconcile_interval_ms: Some(20_000),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            static_assignment: BTreeMap::new(),
            event_queue_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        let context = "coordinator config";
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("session_timeout_ms", self.session_timeout_ms),
            ("revoke_ack_timeout_ms", self.revoke_ack_timeout_ms),
            ("assign_ack_timeout_ms", self.assign_ack_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(CoordinatorError::invalid_config(
                context,
                format!("{name} must be greater than zero"),
            ));
        }
        if self.session_timeout_ms <= self.heartbeat_interval_ms {
            return Err(CoordinatorError::invalid_config(
                context,
                format!(
                    "session_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                    self.session_timeout_ms, self.heartbeat_interval_ms
                ),
            ));
        }
        if self.max_retry_backoff_ms < self.retry_backoff_ms {
            return Err(CoordinatorError::invalid_config(
                context,
                "max_retry_backoff_ms is smaller than retry_backoff_ms",
            ));
        }
        if self.reconcile_interval_ms == Some(0) {
            return Err(CoordinatorError::invalid_config(
                context,
                "reconcile_interval_ms must be greater than zero when set",
            ));
        }
        if self.virtual_nodes == 0 {
            return Err(CoordinatorError::invalid_config(
                context,
                "virtual_nodes must be greater than zero",
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(CoordinatorError::invalid_config(
                context,
                "event_queue_capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.session_timeout_ms as i64)
    }

    pub fn revoke_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.revoke_ack_timeout_ms)
    }

    pub fn assign_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.assign_ack_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile_interval_ms.map(Duration::from_millis)
    }

    /// Exponential backoff before retry number `attempt` (1-based), capped.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let backoff = self.retry_backoff_ms.saturating_mul(factor);
        Duration::from_millis(backoff.min(self.max_retry_backoff_ms))
    }

    /// Strategy settings, with `kind` overriding the configured default.
    pub fn strategy_config(&self, kind: Option<StrategyKind>) -> StrategyConfig {
        StrategyConfig {
            kind: kind.unwrap_or(self.assignment_strategy),
            virtual_nodes: self.virtual_nodes,
            static_assignment: self.static_assignment.clone(),
        }
    }
}

/// One consumer group and the topic it consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub group_id: String,
    pub topic: String,
    /// Overrides `CoordinatorConfig::assignment_strategy` for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterManifest {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    pub topics: Vec<TopicSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

impl ClusterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_topic(&self, topic: &str) -> Result<&TopicSpec, CoordinatorError> {
        self.topics
            .iter()
            .find(|spec| spec.name == topic)
            .ok_or_else(|| {
                keel::KeelError::TopicNotFound {
                    topic: topic.to_string(),
                }
                .into()
            })
    }

    pub fn get_group(&self, group_id: &str) -> Result<&GroupSpec, CoordinatorError> {
        self.groups
            .iter()
            .find(|spec| spec.group_id == group_id)
            .ok_or_else(|| CoordinatorError::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        self.coordinator.validate()?;

        let mut topics = BTreeSet::new();
        for spec in &self.topics {
            if !topics.insert(spec.name.as_str()) {
                return Err(CoordinatorError::invalid_config(
                    "manifest topics",
                    format!("topic '{}' is declared twice", spec.name),
                ));
            }
            if spec.partition_count == 0 {
                return Err(CoordinatorError::invalid_config(
                    "manifest topics",
                    format!("topic '{}' has zero partitions", spec.name),
                ));
            }
            if spec.brokers.is_empty() {
                return Err(CoordinatorError::invalid_config(
                    "manifest topics",
                    format!("topic '{}' has no brokers", spec.name),
                ));
            }
        }

        let mut groups = BTreeSet::new();
        for spec in &self.groups {
            GroupId::parse(spec.group_id.as_str())?;
            if !groups.insert(spec.group_id.as_str()) {
                return Err(CoordinatorError::invalid_config(
                    "manifest groups",
                    format!("group '{}' is declared twice", spec.group_id),
                ));
            }
            if !topics.contains(spec.topic.as_str()) {
                return Err(CoordinatorError::invalid_config(
                    "manifest groups",
                    format!(
                        "group '{}' consumes unknown topic '{}'",
                        spec.group_id, spec.topic
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn build_catalog(&self) -> Result<InMemoryPartitionCatalog, CoordinatorError> {
        Ok(InMemoryPartitionCatalog::with_topics(self.topics.iter().cloned())?)
    }
}
