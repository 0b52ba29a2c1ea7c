//! Heartbeat timer and acknowledgement tracking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Heartbeat Task     │
//! │  (tokio::spawn)     │
//! │                     │
//! │  Every interval:    │
//! │  1. Wait for tick   │
//! │  2. Signal tick ────┼──> channel(1) ──> Shard loop: acked? send op 1 : connection lost
//! │  3. Repeat          │
//! └─────────────────────┘
//! ```
//!
//! The task only produces ticks; the shard loop owns the socket and decides
//! what a tick means. The channel holds a single pending tick so a loop that
//! was busy does not see a burst of stale ticks afterwards.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Running heartbeat timer for one connection
pub struct Heartbeat {
    ticks: mpsc::Receiver<()>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn a timer that ticks immediately and then every `interval`
    pub fn spawn(interval: Duration, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (tick_tx, ticks) = mpsc::channel(1);
        let handle = tokio::spawn(heartbeat_task(interval, tick_tx, cancel.clone()));

        Self {
            ticks,
            cancel,
            handle,
        }
    }

    /// Wait for the next tick; pends forever once the timer is gone
    pub async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn heartbeat_task(interval: Duration, tick_tx: mpsc::Sender<()>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Heartbeat task started with interval: {:?}", interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(mpsc::error::TrySendError::Closed(_)) = tick_tx.try_send(()) {
                    break;
                }
            }
        }
    }

    debug!("Heartbeat task exiting");
}

/// Tracks whether the last heartbeat was acknowledged and how long it took
///
/// Owned by the shard loop; no synchronization needed.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    acked: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self {
            acked: true,
            last_sent: None,
            latency: None,
        }
    }

    /// Call right after a heartbeat went out
    pub fn record_sent(&mut self) {
        self.acked = false;
        self.last_sent = Some(Instant::now());
    }

    /// Call on op 11
    pub fn record_ack(&mut self) {
        self.acked = true;
        if let Some(sent) = self.last_sent {
            self.latency = Some(sent.elapsed());
        }
    }

    /// True if nothing is outstanding
    #[inline]
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// True if the last heartbeat went out less than `window` ago
    pub fn sent_within(&self, window: Duration) -> bool {
        self.last_sent.is_some_and(|sent| sent.elapsed() < window)
    }

    /// Start fresh for a new connection; the last latency is kept
    pub fn reset(&mut self) {
        self.acked = true;
        self.last_sent = None;
    }
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new()
    }
}
