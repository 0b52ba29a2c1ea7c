//! Outbound commands and the owner-side handle of a shard

use super::{ShardSnapshot, ShardStatus};
use crate::error::{GatewayError, Result};
use crate::protocol::{OpCode, OutboundFrame};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Commands the shard loop accepts from its owner
#[derive(Debug, Clone)]
pub enum ShardCommand {
    /// Write one frame on the current connection
    Send(OutboundFrame),
}

/// Owner-side handle: command sender plus the shard's status cell
#[derive(Debug, Clone)]
pub struct ShardHandle {
    shard_id: u32,
    commands: mpsc::Sender<ShardCommand>,
    status: watch::Receiver<ShardSnapshot>,
}

impl ShardHandle {
    pub(crate) fn new(
        shard_id: u32,
        commands: mpsc::Sender<ShardCommand>,
        status: watch::Receiver<ShardSnapshot>,
    ) -> Self {
        Self {
            shard_id,
            commands,
            status,
        }
    }

    #[inline]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        *self.status.borrow()
    }

    pub fn status(&self) -> ShardStatus {
        self.status.borrow().status
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// A fresh receiver on the status cell
    pub fn watch(&self) -> watch::Receiver<ShardSnapshot> {
        self.status.clone()
    }

    /// Wait until the shard reports `status`
    pub async fn wait_for(&self, status: ShardStatus) -> Result<()> {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(|snapshot| snapshot.status == status).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(GatewayError::ShardStopped(self.shard_id))
        }
    }

    /// Queue a Presence Update, Voice State Update or Request Guild Members frame
    ///
    /// Frames wait in the shard's queue until the session is Ready, so
    /// nothing is written before Identify or Resume.
    pub async fn send<T: Serialize>(&self, op: OpCode, data: &T) -> Result<()> {
        if !op.is_user_command() {
            return Err(GatewayError::ForbiddenOpcode(op));
        }
        let frame = OutboundFrame::new(op, serde_json::to_value(data)?);
        self.commands
            .send(ShardCommand::Send(frame))
            .await
            .map_err(|_| GatewayError::ShardStopped(self.shard_id))
    }
}
