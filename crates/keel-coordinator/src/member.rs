//! In-process member transport over tokio channels.

use crate::{
    CoordinatorError,
    protocol::{AssignCommand, MemberAck, RevokeCommand},
    traits::MemberHandle,
};
use async_trait::async_trait;
use keel::{Epoch, MemberId};
use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_INBOX_CAPACITY: usize = 16;

/// A command awaiting the member's acknowledgement.
#[derive(Debug)]
pub enum MemberCommand {
    Revoke {
        command: RevokeCommand,
        ack: oneshot::Sender<MemberAck>,
    },
    Assign {
        command: AssignCommand,
        ack: oneshot::Sender<MemberAck>,
    },
}

impl MemberCommand {
    pub fn epoch(&self) -> Epoch {
        match self {
            MemberCommand::Revoke { command, .. } => command.epoch,
            MemberCommand::Assign { command, .. } => command.epoch,
        }
    }

    /// Acknowledge with the command's own epoch. Returns false if the
    /// coordinator stopped waiting.
    pub fn acknowledge(self, member_id: &MemberId) -> bool {
        let epoch = self.epoch();
        let ack = match self {
            MemberCommand::Revoke { ack, .. } | MemberCommand::Assign { ack, .. } => ack,
        };
        ack.send(MemberAck::new(member_id.clone(), epoch)).is_ok()
    }
}

/// Coordinator side of a member channel.
#[derive(Debug, Clone)]
pub struct ChannelMemberHandle {
    sender: mpsc::Sender<MemberCommand>,
}

/// Member side of a member channel.
#[derive(Debug)]
pub struct MemberInbox {
    receiver: mpsc::Receiver<MemberCommand>,
}

pub fn member_channel(capacity: usize) -> (ChannelMemberHandle, MemberInbox) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelMemberHandle { sender }, MemberInbox { receiver })
}

impl ChannelMemberHandle {
    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<MemberAck>) -> MemberCommand,
        context: &str,
    ) -> Result<MemberAck, CoordinatorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .send(build(ack_tx))
            .await
            .map_err(|_| CoordinatorError::channel_closed(context))?;
        ack_rx
            .await
            .map_err(|_| CoordinatorError::channel_closed(context))
    }
}

#[async_trait]
impl MemberHandle for ChannelMemberHandle {
    async fn revoke(&self, command: RevokeCommand) -> Result<MemberAck, CoordinatorError> {
        self.request(|ack| MemberCommand::Revoke { command, ack }, "revoke delivery")
            .await
    }

    async fn assign(&self, command: AssignCommand) -> Result<MemberAck, CoordinatorError> {
        self.request(|ack| MemberCommand::Assign { command, ack }, "assign delivery")
            .await
    }
}

impl MemberInbox {
    pub async fn recv(&mut self) -> Option<MemberCommand> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MemberCommand> {
        self.receiver.try_recv().ok()
    }

    /// True once the coordinator has dropped every handle to this member.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Acknowledge every command as it arrives until the handle is dropped.
    pub fn auto_acknowledge(mut self, member_id: MemberId) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(command) = self.recv().await {
                trace!("Member '{member_id}' auto-acknowledging {}", command.epoch());
                command.acknowledge(&member_id);
            }
            debug!("Inbox of member '{member_id}' closed");
        })
    }
}
