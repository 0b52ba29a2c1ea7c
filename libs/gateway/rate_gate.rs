//! Fixed-window throttle for session starts
//!
//! All shards of one client share a single gate. At most `capacity` permits are
//! handed out per `window`; a background timer refills the bucket on every
//! window tick and wakes parked callers in FIFO order, never more than
//! `capacity` of them per tick.
//!
//! ```text
//!  acquire() ──> available > 0 ? ──yes──> take permit, return
//!                      │
//!                      no
//!                      ▼
//!               park on oneshot  <──── tick: available = capacity,
//!                                      wake up to `capacity` waiters
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const MIN_WINDOW: Duration = Duration::from_millis(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateGateError {
    #[error("rate gate closed")]
    Closed,

    #[error("acquire cancelled")]
    Cancelled,
}

/// Point-in-time view of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGateState {
    pub capacity: u32,
    pub window: Duration,
    pub available: u32,
    pub waiters: usize,
}

struct Bucket {
    available: u32,
    waiters: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

struct Shared {
    capacity: u32,
    window: Duration,
    bucket: Mutex<Bucket>,
}

impl Shared {
    fn refill(&self) {
        let mut bucket = self.bucket.lock();
        if bucket.closed {
            return;
        }
        bucket.available = self.capacity;

        let mut woken = 0u32;
        while bucket.available > 0 {
            let Some(waiter) = bucket.waiters.pop_front() else {
                break;
            };
            // A send fails only when the waiter gave up; that costs no permit
            if waiter.send(()).is_ok() {
                bucket.available -= 1;
                woken += 1;
            }
        }

        trace!(
            woken,
            available = bucket.available,
            parked = bucket.waiters.len(),
            "Rate gate window tick"
        );
    }

    /// Hand back a permit that was granted to a caller who no longer wants it
    fn give_back(&self) {
        let mut bucket = self.bucket.lock();
        bucket.available = (bucket.available + 1).min(self.capacity);
    }
}

/// Shared fixed-window throttle
///
/// Must be created inside a Tokio runtime; the refill timer is spawned on
/// construction and stops on [`RateGate::close`] or drop.
pub struct RateGate {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RateGate {
    /// Create a gate allowing `capacity` acquisitions per `window`
    ///
    /// `capacity` is clamped to at least 1 and `window` to at least 1ms.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);
        let window = window.max(MIN_WINDOW);

        let shared = Arc::new(Shared {
            capacity,
            window,
            bucket: Mutex::new(Bucket {
                available: capacity,
                waiters: VecDeque::new(),
                closed: false,
            }),
        });

        let timer = tokio::spawn(refill_task(Arc::downgrade(&shared), window));
        debug!(capacity, ?window, "Rate gate created");

        Self {
            shared,
            timer: Mutex::new(Some(timer)),
        }
    }

    /// Wait for a permit
    ///
    /// Returns immediately while the current window has permits left,
    /// otherwise parks until a window tick releases this caller. A cancelled
    /// caller never keeps a permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateGateError> {
        let mut rx = {
            let mut bucket = self.shared.bucket.lock();
            if bucket.closed {
                return Err(RateGateError::Closed);
            }
            if bucket.available > 0 {
                bucket.available -= 1;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            bucket.waiters.push_back(tx);
            rx
        };

        tokio::select! {
            biased;
            granted = &mut rx => granted.map_err(|_| RateGateError::Closed),
            _ = cancel.cancelled() => {
                rx.close();
                // The tick may have granted us a permit just before we closed
                if rx.try_recv().is_ok() {
                    self.shared.give_back();
                }
                Err(RateGateError::Cancelled)
            }
        }
    }

    /// Stop the timer, release every parked caller with `Closed` and make
    /// later calls fail fast
    pub fn close(&self) {
        {
            let mut bucket = self.shared.bucket.lock();
            if bucket.closed {
                return;
            }
            bucket.closed = true;
            bucket.available = 0;
            bucket.waiters.clear();
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        debug!("Rate gate closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.bucket.lock().closed
    }

    pub fn state(&self) -> RateGateState {
        let mut bucket = self.shared.bucket.lock();
        bucket.waiters.retain(|tx| !tx.is_closed());
        RateGateState {
            capacity: self.shared.capacity,
            window: self.shared.window,
            available: bucket.available,
            waiters: bucket.waiters.len(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.shared.window
    }
}

impl Drop for RateGate {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate").field("state", &self.state()).finish()
    }
}

async fn refill_task(shared: Weak<Shared>, window: Duration) {
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match shared.upgrade() {
            Some(shared) => shared.refill(),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_capacity_within_one_window() {
        let gate = RateGate::new(3, WINDOW);
        let token = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..3 {
            gate.acquire(&token).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.state().available, 0);

        gate.acquire(&token).await.unwrap();
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_callers_one_window_apart() {
        let gate = Arc::new(RateGate::new(1, WINDOW));
        let token = CancellationToken::new();
        let start = Instant::now();

        let timed = move |gate: Arc<RateGate>, token: CancellationToken| async move {
            gate.acquire(&token).await.unwrap();
            start.elapsed()
        };

        let (a, b) = tokio::join!(
            timed(Arc::clone(&gate), token.clone()),
            timed(Arc::clone(&gate), token.clone())
        );
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        assert_eq!(first, Duration::ZERO);
        assert_eq!(second, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_permit_after_tick_is_immediate() {
        let gate = RateGate::new(1, WINDOW);
        let token = CancellationToken::new();

        gate.acquire(&token).await.unwrap();
        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(gate.state().available, 1);

        let before = Instant::now();
        gate.acquire(&token).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_wakes_at_most_capacity() {
        let gate = Arc::new(RateGate::new(2, WINDOW));
        let token = CancellationToken::new();
        gate.acquire(&token).await.unwrap();
        gate.acquire(&token).await.unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let gate = Arc::clone(&gate);
            let token = token.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                gate.acquire(&token).await.unwrap();
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(gate.state().waiters, 1);

        tokio::time::sleep(WINDOW).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_keeps_no_permit() {
        let gate = Arc::new(RateGate::new(1, WINDOW));
        let token = CancellationToken::new();
        gate.acquire(&token).await.unwrap();

        let waiter_token = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let waiter_token = waiter_token.clone();
            tokio::spawn(async move { gate.acquire(&waiter_token).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        waiter_token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(RateGateError::Cancelled));

        tokio::time::sleep(WINDOW).await;
        assert_eq!(gate.state().available, 1);
        assert_eq!(gate.state().waiters, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_waiters_and_fails_fast() {
        let gate = Arc::new(RateGate::new(1, WINDOW));
        let token = CancellationToken::new();
        gate.acquire(&token).await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            let token = token.clone();
            tokio::spawn(async move { gate.acquire(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.close();
        assert_eq!(waiter.await.unwrap(), Err(RateGateError::Closed));
        assert_eq!(gate.acquire(&token).await, Err(RateGateError::Closed));
        assert!(gate.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamps_capacity_and_window() {
        let gate = RateGate::new(0, Duration::ZERO);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.window(), MIN_WINDOW);
    }
}
