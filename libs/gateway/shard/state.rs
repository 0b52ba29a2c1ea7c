//! Per-shard session state and the values other components observe

use crate::protocol::ResumePayload;
use std::time::Duration;

/// Lifecycle status of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardStatus {
    /// Socket open, waiting for Hello
    PendingHandshake,
    /// Identify or Resume sent, waiting for READY/RESUMED
    Identifying,
    /// Session established
    Ready,
    /// Connection lost or server asked to reconnect; re-entering the handshake
    Degraded,
    /// Shard loop has exited
    Stopped,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingHandshake => "pending_handshake",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session data owned by a single shard loop
#[derive(Debug, Clone)]
pub struct ShardSessionState {
    pub shard_id: u32,
    pub status: ShardStatus,
    pub session_id: Option<String>,
    pub resume_url: Option<String>,
    pub last_sequence: Option<u64>,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_acked: bool,
}

impl ShardSessionState {
    pub fn new(shard_id: u32) -> Self {
        Self {
            shard_id,
            status: ShardStatus::PendingHandshake,
            session_id: None,
            resume_url: None,
            last_sequence: None,
            heartbeat_interval_ms: 0,
            heartbeat_acked: true,
        }
    }

    /// Whether the next handshake should Resume instead of Identify
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        let session_id = self.session_id.clone()?;
        Some(ResumePayload {
            token: token.to_string(),
            session_id,
            seq: self.last_sequence.unwrap_or(0),
        })
    }

    /// Record a READY dispatch
    pub fn start_session(&mut self, session_id: String, resume_url: Option<String>, sequence: Option<u64>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
        self.last_sequence = sequence;
    }

    /// Forget the session so the next handshake identifies from scratch
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.last_sequence = None;
    }

    pub fn observe_sequence(&mut self, sequence: Option<u64>) {
        if let Some(seq) = sequence {
            self.last_sequence = Some(seq);
        }
    }
}

/// Observable view of a shard, published through a watch cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSnapshot {
    pub status: ShardStatus,
    /// Round trip of the last acknowledged heartbeat
    pub latency: Option<Duration>,
}

impl Default for ShardSnapshot {
    fn default() -> Self {
        Self {
            status: ShardStatus::PendingHandshake,
            latency: None,
        }
    }
}

/// Lifecycle notifications a shard sends to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEvent {
    Ready { shard_id: u32, session_id: String },
    Resumed { shard_id: u32 },
    ConnectionLost { shard_id: u32, reason: String },
    Stopped { shard_id: u32, reason: Option<String> },
}

impl ShardEvent {
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Ready { shard_id, .. }
            | Self::Resumed { shard_id }
            | Self::ConnectionLost { shard_id, .. }
            | Self::Stopped { shard_id, .. } => *shard_id,
        }
    }
}
