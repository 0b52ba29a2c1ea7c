//! Shard connection state machine
//!
//! ```text
//!            connect                 Hello                  READY / RESUMED
//!  (start) ─────────> PendingHandshake ────> Identifying ───────────────────> Ready
//!                                                 ▲                            │
//!                                                 │ Hello                      │ op 7 / op 9 / close /
//!                                                 │                            │ missed ACK
//!                                              Degraded <──────────────────────┘
//! ```
//!
//! One task runs [`ShardConnection::run`]. It is the only reader of the socket
//! and the only writer of the session state, so envelopes are handled
//! strictly in arrival order. A second task ticks the heartbeat timer.

use super::heartbeat::{Heartbeat, HeartbeatTracker};
use super::{ShardCommand, ShardEvent, ShardHandle, ShardSessionState, ShardSnapshot, ShardStatus};
use crate::dispatch::{DispatchItem, DispatchSender};
use crate::protocol::{
    close_action, gateway_url, CloseAction, GatewayEnvelope, GatewayIntents, HelloPayload,
    IdentifyPayload, IdentifyProperties, OpCode, ReadyPayload, EVENT_READY, EVENT_RESUMED,
};
use crate::rate_gate::{RateGate, RateGateError};
use crate::utils::sleep_or_cancel;
use futures::FutureExt;
use gatesocket::{ReconnectPolicy, SocketError, TransportSocket};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close code used when the client drops a connection it wants to resume
///
/// Anything other than 1000/1001 keeps the session alive on the server.
const RESUMABLE_CLOSE: u16 = 4000;

const COMMAND_QUEUE: usize = 32;

/// Everything a shard needs to connect and identify
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub shard_id: u32,
    pub total_shards: u32,
    pub token: String,
    pub intents: GatewayIntents,
    pub properties: IdentifyProperties,
    pub large_threshold: Option<u32>,
    /// Base WebSocket URL, without query string
    pub gateway_url: String,
    pub gateway_version: u8,
    pub compress: Option<String>,
    /// Wait after op 7 / op 9 before reconnecting
    pub reconnect_delay: Duration,
    /// Retry schedule after transport failures and missed heartbeats
    pub backoff: ReconnectPolicy,
}

/// Why one connection cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// Owner asked the shard to stop
    Cancelled,
    /// Server sent op 7 or op 9
    Reconnect { resumable: bool },
    /// Socket failed, closed, or the heartbeat went unanswered
    ConnectionLost(String),
    /// Reconnecting cannot succeed
    Fatal(String),
}

/// Result of one wait in the session loop
enum Step {
    Cancelled,
    HeartbeatDue,
    Command(ShardCommand),
    Frame(gatesocket::Result<String>),
}

/// One gateway connection and its protocol state machine
pub struct ShardConnection {
    config: ShardConfig,
    socket: TransportSocket,
    session: ShardSessionState,
    gate: Arc<RateGate>,
    dispatch: DispatchSender,
    commands: mpsc::Receiver<ShardCommand>,
    status: watch::Sender<ShardSnapshot>,
    events: mpsc::UnboundedSender<ShardEvent>,
    cancel: CancellationToken,
    heartbeat: Option<Heartbeat>,
    tracker: HeartbeatTracker,
    /// Consecutive failed connection cycles, reset on READY/RESUMED
    failures: usize,
}

impl ShardConnection {
    /// Create a shard and the handle its owner keeps
    ///
    /// Nothing happens until [`ShardConnection::run`] is awaited.
    pub fn new(
        config: ShardConfig,
        gate: Arc<RateGate>,
        dispatch: DispatchSender,
        events: mpsc::UnboundedSender<ShardEvent>,
        cancel: CancellationToken,
    ) -> (Self, ShardHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (status, status_rx) = watch::channel(ShardSnapshot::default());
        let handle = ShardHandle::new(config.shard_id, command_tx, status_rx);

        let connection = Self {
            session: ShardSessionState::new(config.shard_id),
            config,
            socket: TransportSocket::new(),
            gate,
            dispatch,
            commands,
            status,
            events,
            cancel,
            heartbeat: None,
            tracker: HeartbeatTracker::new(),
            failures: 0,
        };

        (connection, handle)
    }

    #[inline]
    fn id(&self) -> u32 {
        self.config.shard_id
    }

    /// Drive the shard until it is cancelled or hits a fatal condition
    pub async fn run(mut self) {
        let shard_id = self.id();
        info!(shard_id, total = self.config.total_shards, "Shard starting");

        let mut url = self.fresh_url();
        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break None;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break None,
                result = self.socket.connect(&url) => result,
            };

            let end = match connected {
                Ok(()) => {
                    debug!(shard_id, url = %url, "Socket connected");
                    if self.session.status != ShardStatus::Degraded {
                        self.set_status(ShardStatus::PendingHandshake);
                    }
                    self.tracker.reset();
                    self.run_session().await
                }
                Err(e) => SessionEnd::ConnectionLost(e.to_string()),
            };
            self.heartbeat = None;

            match end {
                SessionEnd::Cancelled => break None,
                SessionEnd::Fatal(reason) => {
                    error!(shard_id, "Shard stopping: {}", reason);
                    break Some(reason);
                }
                SessionEnd::Reconnect { resumable } => {
                    if !resumable {
                        self.session.clear_session();
                    }
                    info!(shard_id, resumable, "Server requested reconnect");
                    self.socket.close_with(RESUMABLE_CLOSE, "reconnecting").await;
                    self.set_status(ShardStatus::Degraded);

                    if !sleep_or_cancel(self.config.reconnect_delay, &self.cancel).await {
                        break None;
                    }
                }
                SessionEnd::ConnectionLost(reason) => {
                    warn!(shard_id, "Connection lost: {}", reason);
                    self.socket.close_with(RESUMABLE_CLOSE, "connection lost").await;
                    self.set_status(ShardStatus::Degraded);
                    self.emit(ShardEvent::ConnectionLost { shard_id, reason });

                    let Some(delay) = self.config.backoff.next_delay(self.failures) else {
                        break Some(format!(
                            "giving up after {} failed reconnect attempts",
                            self.failures
                        ));
                    };
                    self.failures += 1;
                    info!(
                        shard_id,
                        "Reconnecting in {:?} (attempt {})", delay, self.failures
                    );
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        break None;
                    }
                }
            }

            url = self.next_url();
        };

        self.heartbeat = None;
        self.socket.close().await;
        self.set_status(ShardStatus::Stopped);
        info!(shard_id, "Shard stopped");
        self.emit(ShardEvent::Stopped {
            shard_id,
            reason: stop_reason,
        });
    }

    /// One connection cycle: from an open socket until it must be torn down
    async fn run_session(&mut self) -> SessionEnd {
        loop {
            // Unbiased so a flood of frames cannot starve the heartbeat
            // Commands stay queued until the session is authenticated
            let ready = self.session.status.is_ready();
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = next_heartbeat(&mut self.heartbeat) => Step::HeartbeatDue,
                Some(command) = self.commands.recv(), if ready => Step::Command(command),
                frame = self.socket.receive() => Step::Frame(frame),
            };

            let outcome = match step {
                Step::Cancelled => Some(SessionEnd::Cancelled),
                Step::HeartbeatDue => self.on_heartbeat_due().await,
                Step::Command(ShardCommand::Send(frame)) => {
                    debug!(shard_id = self.id(), op = %frame.op, "Sending command");
                    self.send(frame.op, &frame.d).await.err()
                }
                Step::Frame(frame) => self.on_frame(frame).await,
            };

            if let Some(end) = outcome {
                return end;
            }
        }
    }

    async fn on_frame(&mut self, frame: gatesocket::Result<String>) -> Option<SessionEnd> {
        match frame {
            Ok(text) => match GatewayEnvelope::from_json(&text) {
                Ok(envelope) => self.handle_envelope(envelope).await,
                Err(e) => {
                    warn!(shard_id = self.id(), "Failed to parse envelope: {}", e);
                    None
                }
            },
            Err(e) => self.on_socket_error(e),
        }
    }

    async fn handle_envelope(&mut self, envelope: GatewayEnvelope) -> Option<SessionEnd> {
        match envelope.op {
            OpCode::Hello => self.on_hello(&envelope).await,
            OpCode::Heartbeat => {
                debug!(shard_id = self.id(), "Server requested heartbeat");
                self.send_heartbeat().await.err()
            }
            OpCode::HeartbeatAck => {
                self.tracker.record_ack();
                self.session.heartbeat_acked = true;
                let latency = self.tracker.latency();
                self.status.send_modify(|snapshot| snapshot.latency = latency);
                None
            }
            OpCode::Reconnect => Some(SessionEnd::Reconnect { resumable: true }),
            OpCode::InvalidSession => {
                let resumable = envelope.payload::<bool>().unwrap_or(false);
                Some(SessionEnd::Reconnect { resumable })
            }
            OpCode::Dispatch => self.on_dispatch(envelope).await,
            other => {
                debug!(shard_id = self.id(), op = %other, "Ignoring unexpected op code");
                None
            }
        }
    }

    async fn on_hello(&mut self, envelope: &GatewayEnvelope) -> Option<SessionEnd> {
        let hello: HelloPayload = match envelope.payload() {
            Ok(hello) => hello,
            Err(e) => return Some(SessionEnd::ConnectionLost(format!("invalid Hello payload: {e}"))),
        };
        debug!(shard_id = self.id(), interval_ms = hello.heartbeat_interval, "Received Hello");
        self.session.heartbeat_interval_ms = hello.heartbeat_interval;

        if let Err(end) = self.begin_session().await {
            return Some(end);
        }

        self.set_status(ShardStatus::Identifying);
        self.heartbeat = Some(Heartbeat::spawn(
            Duration::from_millis(hello.heartbeat_interval),
            &self.cancel,
        ));
        None
    }

    /// Resume a known session or Identify through the rate gate
    async fn begin_session(&mut self) -> Result<(), SessionEnd> {
        if let Some(resume) = self.session.resume_payload(&self.config.token) {
            info!(
                shard_id = self.id(),
                session_id = %resume.session_id,
                seq = resume.seq,
                "Resuming session"
            );
            return self.send(OpCode::Resume, &resume).await;
        }

        debug!(shard_id = self.id(), "Waiting for identify permit");
        match self.gate.acquire(&self.cancel).await {
            Ok(()) => {}
            Err(RateGateError::Cancelled) => return Err(SessionEnd::Cancelled),
            Err(RateGateError::Closed) => return Err(SessionEnd::Fatal("rate gate closed".to_string())),
        }

        info!(shard_id = self.id(), "Identifying");
        let identify = self.identify_payload();
        self.send(OpCode::Identify, &identify).await
    }

    async fn on_dispatch(&mut self, envelope: GatewayEnvelope) -> Option<SessionEnd> {
        let shard_id = self.id();
        self.session.observe_sequence(envelope.s);

        match envelope.event_type() {
            Some(EVENT_READY) => {
                let ready: ReadyPayload = match envelope.payload() {
                    Ok(ready) => ready,
                    Err(e) => return Some(SessionEnd::ConnectionLost(format!("invalid READY payload: {e}"))),
                };
                info!(shard_id, session_id = %ready.session_id, "Shard ready");
                self.session
                    .start_session(ready.session_id.clone(), ready.resume_gateway_url, envelope.s);
                self.failures = 0;
                self.set_status(ShardStatus::Ready);
                self.emit(ShardEvent::Ready {
                    shard_id,
                    session_id: ready.session_id,
                });
                None
            }
            Some(EVENT_RESUMED) => {
                info!(shard_id, seq = ?self.session.last_sequence, "Session resumed");
                self.failures = 0;
                self.set_status(ShardStatus::Ready);
                self.emit(ShardEvent::Resumed { shard_id });
                None
            }
            _ => {
                let event = envelope.t.clone();
                let item = DispatchItem::new(shard_id, envelope);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        warn!(shard_id, event = ?event, "Shutdown while queueing dispatch, event dropped");
                        Some(SessionEnd::Cancelled)
                    }
                    queued = self.dispatch.enqueue_blocking(item) => {
                        if queued.is_err() {
                            warn!(shard_id, event = ?event, "Dispatch queue closed, event dropped");
                        }
                        None
                    }
                }
            }
        }
    }

    async fn on_heartbeat_due(&mut self) -> Option<SessionEnd> {
        // The ACK may already be buffered if the loop was parked on a full
        // dispatch queue when it arrived
        while !self.tracker.is_acked() {
            let Some(frame) = self.socket.receive().now_or_never() else {
                break;
            };
            if let Some(end) = self.on_frame(frame).await {
                return Some(end);
            }
        }

        if !self.tracker.is_acked() {
            // A tick buffered while the loop was parked can fire right after a send
            let interval = Duration::from_millis(self.session.heartbeat_interval_ms);
            if self.tracker.sent_within(interval / 2) {
                return None;
            }
            return Some(SessionEnd::ConnectionLost(
                "heartbeat not acknowledged before next interval".to_string(),
            ));
        }
        self.send_heartbeat().await.err()
    }

    fn on_socket_error(&mut self, error: SocketError) -> Option<SessionEnd> {
        if !error.is_connection_ended() {
            warn!(shard_id = self.id(), "Discarding unreadable frame: {}", error);
            return None;
        }

        let code = error.close_code();
        match close_action(code) {
            CloseAction::Fatal => Some(SessionEnd::Fatal(error.to_string())),
            CloseAction::Reidentify => {
                info!(shard_id = self.id(), ?code, "Session invalidated by close code");
                self.session.clear_session();
                Some(SessionEnd::ConnectionLost(error.to_string()))
            }
            CloseAction::Resume => Some(SessionEnd::ConnectionLost(error.to_string())),
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), SessionEnd> {
        let seq = self.session.last_sequence;
        self.send(OpCode::Heartbeat, &seq).await?;
        self.tracker.record_sent();
        self.session.heartbeat_acked = false;
        debug!(shard_id = self.id(), ?seq, "Heartbeat sent");
        Ok(())
    }

    async fn send<T: Serialize + ?Sized>(&mut self, op: OpCode, data: &T) -> Result<(), SessionEnd> {
        match self.socket.send(op.as_u8(), data).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_ended() => Err(SessionEnd::ConnectionLost(e.to_string())),
            Err(e) => {
                error!(shard_id = self.id(), op = %op, "Failed to encode frame: {}", e);
                Ok(())
            }
        }
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.config.token.clone(),
            intents: self.config.intents,
            properties: self.config.properties.clone(),
            shard: [self.config.shard_id, self.config.total_shards],
            large_threshold: self.config.large_threshold,
        }
    }

    fn fresh_url(&self) -> String {
        gateway_url(
            &self.config.gateway_url,
            self.config.gateway_version,
            self.config.compress.as_deref(),
        )
    }

    /// Resume URL while a session is known, otherwise the bootstrap URL
    fn next_url(&self) -> String {
        match (&self.session.session_id, &self.session.resume_url) {
            (Some(_), Some(resume_url)) => gateway_url(
                resume_url,
                self.config.gateway_version,
                self.config.compress.as_deref(),
            ),
            _ => self.fresh_url(),
        }
    }

    fn set_status(&mut self, status: ShardStatus) {
        if self.session.status != status {
            debug!(shard_id = self.id(), from = %self.session.status, to = %status, "Status change");
        }
        self.session.status = status;
        self.status.send_modify(|snapshot| snapshot.status = status);
    }

    fn emit(&self, event: ShardEvent) {
        // Owner gone means nobody is listening; the shard keeps running
        let _ = self.events.send(event);
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Heartbeat>) {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => std::future::pending().await,
    }
}
