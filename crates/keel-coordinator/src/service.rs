//! Multi-group coordinator service.
//!
//! Each registered group runs its own [`GroupCoordinator`] task fed by a bounded
//! event queue; groups rebalance independently of one another. Background
//! tickers push heartbeat-expiry and reconciliation events into the same queues,
//! so they never overlap with a group's in-flight rebalance.

use crate::{
    CoordinatorError,
    config::{ClusterManifest, CoordinatorConfig},
    group::{GroupCoordinator, GroupEvent, Reply},
    protocol::{
        AssignmentView, GroupDescription, HeartbeatRequest, HeartbeatResponse, JoinRequest,
        JoinResponse, LeaveRequest, LeaveResponse,
    },
    traits::{MemberHandle, RebalanceService},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use keel::{
    GroupId, MemberId, MembershipRoster, PartitionCatalog, StrategyKind, create_strategy,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

struct GroupEntry {
    topic: String,
    sender: mpsc::Sender<GroupEvent>,
    task: JoinHandle<()>,
}

pub struct CoordinatorService {
    config: CoordinatorConfig,
    catalog: Arc<dyn PartitionCatalog>,
    roster: Arc<MembershipRoster>,
    groups: DashMap<GroupId, GroupEntry>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinatorService {
    pub fn new(
        config: CoordinatorConfig,
        catalog: Arc<dyn PartitionCatalog>,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let roster = Arc::new(MembershipRoster::new(config.session_timeout()));
        Ok(Self {
            config,
            catalog,
            roster,
            groups: DashMap::new(),
            tickers: Mutex::new(Vec::new()),
        })
    }

    /// Build the catalog and register every group the manifest declares.
    /// Must be called inside a tokio runtime.
    pub fn from_manifest(manifest: &ClusterManifest) -> Result<Self, CoordinatorError> {
        manifest.validate()?;
        let catalog = Arc::new(manifest.build_catalog()?);
        let service = Self::new(manifest.coordinator.clone(), catalog)?;
        for spec in &manifest.groups {
            service.register_group(GroupId::parse(spec.group_id.as_str())?, &spec.topic, spec.strategy)?;
        }
        Ok(service)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn roster(&self) -> &Arc<MembershipRoster> {
        &self.roster
    }

    pub fn catalog(&self) -> &Arc<dyn PartitionCatalog> {
        &self.catalog
    }

    /// Spawn a coordinator task for `group_id` consuming `topic`.
    pub fn register_group(
        &self,
        group_id: GroupId,
        topic: &str,
        strategy: Option<StrategyKind>,
    ) -> Result<(), CoordinatorError> {
        self.catalog.partition_count(topic)?;

        let entry = match self.groups.entry(group_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoordinatorError::GroupAlreadyExists {
                    group_id: group_id.to_string(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let strategy = create_strategy(&self.config.strategy_config(strategy));
        let coordinator = GroupCoordinator::new(
            group_id.clone(),
            topic,
            self.config.clone(),
            strategy,
            Arc::clone(&self.catalog),
            Arc::clone(&self.roster),
        );
        let (sender, receiver) = mpsc::channel(self.config.event_queue_capacity);
        let task = tokio::spawn(coordinator.run(receiver));

        entry.insert(GroupEntry {
            topic: topic.to_string(),
            sender,
            task,
        });
        info!("Registered group '{group_id}' on topic '{topic}'");
        Ok(())
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    fn sender(&self, group_id: &GroupId) -> Result<mpsc::Sender<GroupEvent>, CoordinatorError> {
        self.groups
            .get(group_id)
            .map(|entry| entry.sender.clone())
            .ok_or_else(|| CoordinatorError::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }

    async fn send(&self, group_id: &GroupId, event: GroupEvent) -> Result<(), CoordinatorError> {
        let sender = self.sender(group_id)?;
        sender
            .send(event)
            .await
            .map_err(|_| CoordinatorError::channel_closed("group event delivery"))
    }

    async fn request<T>(
        &self,
        group_id: &GroupId,
        build: impl FnOnce(Reply<T>) -> GroupEvent,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.send(group_id, build(reply)).await?;
        response
            .await
            .map_err(|_| CoordinatorError::channel_closed("group reply"))?
    }

    /// Tell every group consuming `topic` that its partition count may have
    /// changed. Returns the number of groups notified.
    pub async fn notify_partitions_changed(&self, topic: &str) -> usize {
        let senders: Vec<(GroupId, mpsc::Sender<GroupEvent>)> = self
            .groups
            .iter()
            .filter(|entry| entry.topic == topic)
            .map(|entry| (entry.key().clone(), entry.sender.clone()))
            .collect();

        let mut notified = 0;
        for (group_id, sender) in senders {
            match sender.send(GroupEvent::PartitionsChanged).await {
                Ok(()) => notified += 1,
                Err(_) => warn!("Group '{group_id}' stopped before partition change delivery"),
            }
        }
        notified
    }

    /// Ask one group to run its reconciliation check now.
    pub async fn reconcile(&self, group_id: &GroupId) -> Result<(), CoordinatorError> {
        self.send(group_id, GroupEvent::Reconcile).await
    }

    fn broadcast(&self, make: impl Fn() -> GroupEvent) {
        for entry in self.groups.iter() {
            if let Err(e) = entry.sender.try_send(make()) {
                debug!("Skipping tick for group '{}': {e}", entry.key());
            }
        }
    }

    /// Spawn the heartbeat-expiry ticker and, when configured, the
    /// reconciliation ticker. Tickers stop once the service is dropped.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut tickers = self.tickers.lock();

        tickers.push(spawn_ticker(
            Arc::downgrade(self),
            self.config.heartbeat_interval(),
            |service| service.broadcast(|| GroupEvent::ExpireTick { now: Utc::now() }),
        ));

        if let Some(interval) = self.config.reconcile_interval() {
            tickers.push(spawn_ticker(Arc::downgrade(self), interval, |service| {
                service.broadcast(|| GroupEvent::Reconcile)
            }));
        }
        debug!("Started {} background ticker(s)", tickers.len());
    }

    /// Stop tickers and every group coordinator, waiting for each to finish.
    pub async fn shutdown(&self) {
        for ticker in self.tickers.lock().drain(..) {
            ticker.abort();
        }

        let group_ids = self.group_ids();
        for group_id in group_ids {
            let Some((_, entry)) = self.groups.remove(&group_id) else {
                continue;
            };
            if entry.sender.send(GroupEvent::Shutdown).await.is_err() {
                debug!("Group '{group_id}' already stopped");
            }
            if let Err(e) = entry.task.await {
                warn!("Coordinator task for group '{group_id}' ended abnormally: {e}");
            }
        }
        info!("Coordinator service shut down");
    }
}

fn spawn_ticker(
    service: Weak<CoordinatorService>,
    period: Duration,
    tick: impl Fn(&CoordinatorService) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(service) = service.upgrade() else {
                break;
            };
            tick(&service);
        }
    })
}

#[async_trait]
impl RebalanceService for CoordinatorService {
    async fn join(
        &self,
        request: JoinRequest,
        handle: Arc<dyn MemberHandle>,
    ) -> Result<JoinResponse, CoordinatorError> {
        let member_id = match request.member_id {
            Some(member_id) => member_id,
            None => MemberId::new_unchecked(format!("member-{}", Uuid::new_v4())),
        };
        self.request(&request.group_id, |reply| GroupEvent::Join {
            member_id,
            handle,
            reply,
        })
        .await
    }

    async fn heartbeat(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, CoordinatorError> {
        self.request(&request.group_id, |reply| GroupEvent::Heartbeat {
            member_id: request.member_id,
            epoch: request.epoch,
            reply,
        })
        .await
    }

    async fn leave(&self, request: LeaveRequest) -> Result<LeaveResponse, CoordinatorError> {
        self.request(&request.group_id, |reply| GroupEvent::Leave {
            member_id: request.member_id,
            reply,
        })
        .await
    }

    async fn fetch_assignment(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
    ) -> Result<AssignmentView, CoordinatorError> {
        let member_id = member_id.clone();
        self.request(group_id, |reply| GroupEvent::FetchAssignment { member_id, reply })
            .await
    }

    async fn describe_group(
        &self,
        group_id: &GroupId,
    ) -> Result<GroupDescription, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.send(group_id, GroupEvent::Describe { reply }).await?;
        response
            .await
            .map_err(|_| CoordinatorError::channel_closed("group describe"))
    }
}
