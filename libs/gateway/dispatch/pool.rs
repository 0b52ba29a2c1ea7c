//! Bounded worker pool for dispatch events

use super::{DispatchHandler, DispatchItem};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    Full(DispatchItem),

    #[error("dispatch queue is closed")]
    Closed(DispatchItem),

    #[error("dispatch pool already started")]
    AlreadyStarted,
}

impl DispatchError {
    /// Recover the item a failed enqueue handed back
    pub fn into_item(self) -> Option<DispatchItem> {
        match self {
            Self::Full(item) | Self::Closed(item) => Some(item),
            Self::AlreadyStarted => None,
        }
    }
}

/// Producer handle onto the dispatch queue
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<DispatchItem>,
}

impl DispatchSender {
    /// Enqueue without waiting; fails with `Full` when the queue is at capacity
    pub fn enqueue(&self, item: DispatchItem) -> Result<(), DispatchError> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => DispatchError::Full(item),
            TrySendError::Closed(item) => DispatchError::Closed(item),
        })
    }

    /// Enqueue, waiting for a free slot while the queue is full
    pub async fn enqueue_blocking(&self, item: DispatchItem) -> Result<(), DispatchError> {
        self.tx
            .send(item)
            .await
            .map_err(|e| DispatchError::Closed(e.0))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Items currently buffered
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Handler outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

struct WorkerContext {
    receiver: Arc<AsyncMutex<mpsc::Receiver<DispatchItem>>>,
    handler: Arc<dyn DispatchHandler>,
    permits: Semaphore,
    closing: CancellationToken,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkerContext {
    /// Next item in FIFO order, or `None` once the worker should exit
    ///
    /// After `closing` fires the queue refuses new items and workers keep
    /// pulling until it is empty. After `cancel` fires they stop pulling.
    async fn next_item(&self) -> Option<DispatchItem> {
        let mut rx = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            rx = self.receiver.lock() => rx,
        };

        if self.cancel.is_cancelled() {
            return None;
        }
        if self.closing.is_cancelled() {
            rx.close();
            return rx.recv().await;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = self.closing.cancelled() => {
                rx.close();
                rx.recv().await
            }
            item = rx.recv() => item,
        }
    }

    async fn process(&self, worker_id: usize, item: DispatchItem) {
        let _permit = self.permits.acquire().await.ok();

        let shard_id = item.shard_id;
        let sequence = item.sequence();
        let event = item.event_type().unwrap_or("-").to_string();

        match AssertUnwindSafe(self.handler.handle(item)).catch_unwind().await {
            Ok(Ok(())) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker_id, shard_id, ?sequence, event = %event, "Dispatch handler failed: {e:#}");
            }
            Err(panic) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    shard_id,
                    ?sequence,
                    event = %event,
                    panic = %panic_message(&panic),
                    "Dispatch handler panicked"
                );
            }
        }
    }
}

async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    debug!(worker_id, "Dispatch worker started");
    while let Some(item) = ctx.next_item().await {
        ctx.process(worker_id, item).await;
    }
    debug!(worker_id, "Dispatch worker exiting");
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed pool of workers draining one bounded queue into one handler
///
/// Producers call [`DispatchSender::enqueue_blocking`] and are held back
/// while the queue is full. Items are pulled FIFO; completion order across
/// workers is unspecified.
pub struct EventDispatchPool {
    sender: DispatchSender,
    receiver: Arc<AsyncMutex<mpsc::Receiver<DispatchItem>>>,
    handler: Arc<dyn DispatchHandler>,
    queue_capacity: usize,
    closing: CancellationToken,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl EventDispatchPool {
    /// Create a stopped pool with a queue of `queue_capacity` items (at least 1)
    pub fn new(queue_capacity: usize, handler: Arc<dyn DispatchHandler>) -> Self {
        Self::with_cancellation(queue_capacity, handler, CancellationToken::new())
    }

    /// Like [`EventDispatchPool::new`], with workers bound to `cancel`
    pub fn with_cancellation(
        queue_capacity: usize,
        handler: Arc<dyn DispatchHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);

        Self {
            sender: DispatchSender { tx },
            receiver: Arc::new(AsyncMutex::new(rx)),
            handler,
            queue_capacity,
            closing: CancellationToken::new(),
            cancel,
            counters: Arc::new(Counters::default()),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn `worker_count` workers (at least 1)
    pub fn start(&self, worker_count: usize) -> Result<(), DispatchError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyStarted);
        }

        if worker_count == 0 {
            warn!("Dispatch pool started with 0 workers, using 1");
        }
        let worker_count = worker_count.max(1);

        let ctx = Arc::new(WorkerContext {
            receiver: Arc::clone(&self.receiver),
            handler: Arc::clone(&self.handler),
            permits: Semaphore::new(worker_count),
            closing: self.closing.clone(),
            cancel: self.cancel.clone(),
            counters: Arc::clone(&self.counters),
        });

        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count {
            workers.push(tokio::spawn(run_worker(worker_id, Arc::clone(&ctx))));
        }

        info!(
            workers = worker_count,
            queue_capacity = self.queue_capacity,
            "Dispatch pool started"
        );
        Ok(())
    }

    /// Close the queue for new items, let workers drain what is buffered and
    /// wait for all of them to exit
    pub async fn stop(&self) {
        debug!(queued = self.sender.queued(), "Stopping dispatch pool");
        self.closing.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        for (worker_id, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker_id, "Dispatch worker crashed: {e}");
            }
        }

        // Anything left was never handed to a worker
        let mut rx = self.receiver.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Dispatch pool stopped with undelivered items");
        }

        let stats = self.counters.snapshot();
        info!(
            processed = stats.processed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Dispatch pool stopped"
        );
    }

    /// Make workers stop pulling; items already in a worker's hands finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn sender(&self) -> DispatchSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, item: DispatchItem) -> Result<(), DispatchError> {
        self.sender.enqueue(item)
    }

    pub async fn enqueue_blocking(&self, item: DispatchItem) -> Result<(), DispatchError> {
        self.sender.enqueue_blocking(item).await
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn queued(&self) -> usize {
        self.sender.queued()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.closing.is_cancelled() && !self.cancel.is_cancelled()
    }
}

impl Drop for EventDispatchPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
