//! Member-side driver: obeys the coordinator's revoke/assign commands and runs
//! fetch, process, retry cycles over the partitions it currently owns.
//!
//! Commands are only applied between cycles, so a revoke is acknowledged after
//! the in-flight batch for the released partitions has been settled.

use crate::{
    WorkerError,
    config::WorkerConfig,
    queue::{DeadLetterQueue, Envelope},
    task::{ItemOutcome, ShardContext, ShardedTask, TaskRegistry},
};
use keel::{Epoch, GroupId, MemberId, Partition};
use keel_coordinator::{
    HeartbeatRequest, HeartbeatResponse, JoinRequest, JoinResponse, MemberCommand, MemberInbox,
    RebalanceService, member::DEFAULT_INBOX_CAPACITY, member_channel,
};
use log::{debug, info, trace, warn};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue,
    DeadLetter,
}

/// Explicit retry budget: an item is dead-lettered on its `max_retries`-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Count one more failed attempt on `envelope` and decide its fate.
    pub fn record_failure<T>(&self, envelope: &mut Envelope<T>) -> RetryDecision {
        envelope.attempts = envelope.attempts.saturating_add(1);
        if envelope.attempts < self.max_retries {
            RetryDecision::Requeue
        } else {
            RetryDecision::DeadLetter
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: u64,
    pub processed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub revokes: u64,
    pub assigns: u64,
    pub heartbeats: u64,
    /// Commands ignored because they belonged to an older epoch.
    pub stale_commands: u64,
}

/// Where a joined worker reports liveness.
struct Liveness {
    service: Arc<dyn RebalanceService>,
    interval: Duration,
}

pub struct Worker<T: Send + Sync + 'static> {
    group_id: GroupId,
    member_id: MemberId,
    config: WorkerConfig,
    task: Arc<dyn ShardedTask<T>>,
    retry: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue<T>>,
    epoch: Epoch,
    owned: BTreeSet<Partition>,
    stats: WorkerStats,
    liveness: Option<Liveness>,
}

impl<T: Send + Sync + 'static> Worker<T> {
    pub fn new(
        group_id: GroupId,
        member_id: MemberId,
        config: WorkerConfig,
        task: Arc<dyn ShardedTask<T>>,
        dead_letters: Arc<DeadLetterQueue<T>>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        Ok(Self {
            group_id,
            member_id,
            retry: RetryPolicy::new(config.max_retries),
            config,
            task,
            dead_letters,
            epoch: Epoch::default(),
            owned: BTreeSet::new(),
            stats: WorkerStats::default(),
            liveness: None,
        })
    }

    /// Build a worker running the task named by `config.task`.
    pub fn from_registry(
        group_id: GroupId,
        member_id: MemberId,
        config: WorkerConfig,
        registry: &TaskRegistry<T>,
        dead_letters: Arc<DeadLetterQueue<T>>,
    ) -> Result<Self, WorkerError> {
        let task = registry.get(&config.task)?;
        Self::new(group_id, member_id, config, task, dead_letters)
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn owned(&self) -> &BTreeSet<Partition> {
        &self.owned
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Apply a coordinator command and acknowledge it. Commands from an epoch
    /// older than the worker's are acknowledged but not applied.
    pub fn handle_command(&mut self, command: MemberCommand) {
        if command.epoch() < self.epoch {
            warn!(
                "Worker '{}' ignoring command for {}, already at {}",
                self.member_id,
                command.epoch(),
                self.epoch
            );
            self.stats.stale_commands += 1;
            command.acknowledge(&self.member_id);
            return;
        }

        match &command {
            MemberCommand::Revoke { command: revoke, .. } => {
                for partition in &revoke.partitions_to_release {
                    self.owned.remove(partition);
                }
                self.stats.revokes += 1;
                info!(
                    "Worker '{}' released {} partition(s) at {}",
                    self.member_id,
                    revoke.partitions_to_release.len(),
                    revoke.epoch
                );
            }
            MemberCommand::Assign { command: assign, .. } => {
                self.adopt(assign.epoch, &assign.partitions_to_own);
                self.stats.assigns += 1;
            }
        }
        if !command.acknowledge(&self.member_id) {
            warn!(
                "Coordinator stopped waiting for ack from worker '{}'",
                self.member_id
            );
        }
    }

    fn adopt(&mut self, epoch: Epoch, partitions: &[Partition]) {
        self.owned = partitions.iter().cloned().collect();
        self.epoch = epoch;
        info!(
            "Worker '{}' owns {} partition(s) at {}",
            self.member_id,
            self.owned.len(),
            self.epoch
        );
    }

    /// Drive `call` to completion while still answering coordinator commands,
    /// since the coordinator may be waiting on this member before it replies.
    /// Returns `None` if the inbox closed first.
    async fn serve_while<F: Future>(&mut self, inbox: &mut MemberInbox, call: F) -> Option<F::Output> {
        let mut call = std::pin::pin!(call);
        loop {
            tokio::select! {
                output = &mut call => return Some(output),
                command = inbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return None,
                },
            }
        }
    }

    /// Report liveness at the worker's epoch. A stale epoch refetches the
    /// current assignment. Returns false once the inbox is closed.
    async fn heartbeat(&mut self, inbox: &mut MemberInbox, service: Arc<dyn RebalanceService>) -> bool {
        let request = HeartbeatRequest {
            group_id: self.group_id.clone(),
            member_id: self.member_id.clone(),
            epoch: self.epoch,
        };
        let Some(response) = self.serve_while(inbox, service.heartbeat(request)).await else {
            return false;
        };
        self.stats.heartbeats += 1;

        match response {
            Ok(HeartbeatResponse::Ok) => {
                trace!("Worker '{}' heartbeat at {}", self.member_id, self.epoch);
            }
            Ok(HeartbeatResponse::RejoinRequired { epoch }) => {
                info!(
                    "Worker '{}' is at {} but group is at {epoch}; refreshing assignment",
                    self.member_id, self.epoch
                );
                let group_id = self.group_id.clone();
                let member_id = self.member_id.clone();
                let fetch = service.fetch_assignment(&group_id, &member_id);
                match self.serve_while(inbox, fetch).await {
                    None => return false,
                    Some(Ok(view)) if view.epoch > self.epoch => {
                        self.adopt(view.epoch, &view.partitions);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Worker '{}' could not refresh assignment: {e}", self.member_id);
                    }
                }
            }
            Err(e) => warn!("Worker '{}' heartbeat failed: {e}", self.member_id),
        }
        true
    }

    fn context(&self, partition: Partition, shard_index: usize) -> ShardContext {
        ShardContext {
            group_id: self.group_id.clone(),
            member_id: self.member_id.clone(),
            epoch: self.epoch,
            partition,
            shard_index,
            shard_total: self.owned.len(),
            parameter: self.config.shard_parameter.clone(),
        }
    }

    /// One fetch/process pass over every owned partition. Returns the number
    /// of items handled.
    pub async fn run_cycle(&mut self) -> Result<usize, WorkerError> {
        let partitions: Vec<Partition> = self.owned.iter().cloned().collect();
        let mut handled = 0;

        for (shard_index, partition) in partitions.into_iter().enumerate() {
            let ctx = self.context(partition, shard_index);
            let batch = self.task.fetch_batch(&ctx, self.config.batch_size).await?;
            if batch.is_empty() {
                continue;
            }
            handled += batch.len();
            let outcomes = self.task.process(&ctx, &batch).await;
            self.settle(&ctx, batch, outcomes).await?;
        }

        self.stats.cycles += 1;
        Ok(handled)
    }

    async fn settle(
        &mut self,
        ctx: &ShardContext,
        batch: Vec<Envelope<T>>,
        outcomes: Vec<ItemOutcome>,
    ) -> Result<(), WorkerError> {
        if outcomes.len() != batch.len() {
            warn!(
                "Task '{}' reported {} outcome(s) for {} item(s); missing ones count as failures",
                self.task.name(),
                outcomes.len(),
                batch.len()
            );
        }

        let mut outcomes = outcomes.into_iter();
        let mut retries = Vec::new();
        for mut envelope in batch {
            let reason = match outcomes.next() {
                Some(ItemOutcome::Done) => {
                    self.stats.processed += 1;
                    continue;
                }
                Some(ItemOutcome::Failed { reason }) => reason,
                None => "no outcome reported".to_string(),
            };

            match self.retry.record_failure(&mut envelope) {
                RetryDecision::Requeue => {
                    debug!(
                        "Retrying item on {} (attempt {}): {reason}",
                        ctx.partition, envelope.attempts
                    );
                    self.stats.retried += 1;
                    retries.push(envelope);
                }
                RetryDecision::DeadLetter => {
                    warn!(
                        "Dead-lettering item on {} after {} attempt(s): {reason}",
                        ctx.partition, envelope.attempts
                    );
                    self.stats.dead_lettered += 1;
                    self.dead_letters
                        .push(ctx.partition.clone(), envelope, reason);
                }
            }
        }

        if !retries.is_empty() {
            self.task.requeue(ctx, retries).await?;
        }
        Ok(())
    }

    /// Serve `inbox` until the coordinator drops this member. A joined worker
    /// also heartbeats every `heartbeat_interval_ms`, even while busy.
    pub async fn run(mut self, mut inbox: MemberInbox) -> WorkerStats {
        info!(
            "Worker '{}' of group '{}' running task '{}'",
            self.member_id,
            self.group_id,
            self.task.name()
        );
        let liveness = self
            .liveness
            .as_ref()
            .map(|l| (Arc::clone(&l.service), l.interval));
        let mut next_heartbeat = liveness
            .as_ref()
            .map(|(_, interval)| Instant::now() + *interval);

        loop {
            while let Some(command) = inbox.try_recv() {
                self.handle_command(command);
            }
            if inbox.is_closed() {
                break;
            }

            if let (Some((service, interval)), Some(due)) = (&liveness, next_heartbeat) {
                if Instant::now() >= due {
                    if !self.heartbeat(&mut inbox, Arc::clone(service)).await {
                        break;
                    }
                    next_heartbeat = Some(Instant::now() + *interval);
                }
            }

            let handled = match self.run_cycle().await {
                Ok(handled) => handled,
                Err(e) => {
                    warn!("Worker '{}' cycle failed: {e}", self.member_id);
                    0
                }
            };
            if handled > 0 {
                tokio::task::yield_now().await;
                continue;
            }

            let mut wake = Instant::now() + self.config.poll_interval();
            if let Some(due) = next_heartbeat {
                wake = wake.min(due);
            }
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
        info!(
            "Worker '{}' stopped after {} cycle(s)",
            self.member_id, self.stats.cycles
        );
        self.stats
    }

    /// Start serving commands, then join the group through `service`. The
    /// running worker heartbeats through the same service.
    ///
    /// The inbox loop is running before the join is sent, since the join only
    /// resolves once this member has acknowledged its assignment.
    pub async fn join<S>(
        mut self,
        service: Arc<S>,
    ) -> Result<(JoinResponse, JoinHandle<WorkerStats>), WorkerError>
    where
        S: RebalanceService + 'static,
    {
        let shared: Arc<dyn RebalanceService> = service.clone();
        self.liveness = Some(Liveness {
            service: shared,
            interval: self.config.heartbeat_interval(),
        });

        let request = JoinRequest::new(self.group_id.clone(), self.member_id.clone());
        let (handle, inbox) = member_channel(DEFAULT_INBOX_CAPACITY);
        let span = tracing::info_span!(
            "worker",
            group_id = %self.group_id,
            member_id = %self.member_id
        );
        let running = tokio::spawn(self.run(inbox).instrument(span));

        match service.join(request, Arc::new(handle)).await {
            Ok(response) => Ok((response, running)),
            Err(e) => {
                running.abort();
                Err(e.into())
            }
        }
    }
}
