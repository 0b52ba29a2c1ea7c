//! Shard coordinator
//!
//! Sizes the client from the server's session limits, owns the shared rate
//! gate and dispatch pool, runs one [`ShardConnection`] per shard id and
//! relays their lifecycle events.
//!
//! Start order: session limits → rate gate → dispatch pool → shards.
//! Stop order: cancel shards → await each shard → stop the pool → close the gate.

use crate::config::GatewayConfig;
use crate::dispatch::{DispatchHandler, DispatchStats, EventDispatchPool};
use crate::error::{GatewayError, Result};
use crate::protocol::OpCode;
use crate::rate_gate::{RateGate, RateGateState};
use crate::rest::{RestClient, SessionLimits, SessionLimitsSource};
use crate::shard::{
    shard_for, ShardConfig, ShardConnection, ShardEvent, ShardHandle, ShardSnapshot, ShardStatus,
};
use crate::utils::sleep_or_cancel;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_BROADCAST_CAPACITY: usize = 256;

struct Running {
    limits: SessionLimits,
    total_shards: u32,
    gate: Arc<RateGate>,
    pool: Arc<EventDispatchPool>,
    shards: Vec<ShardHandle>,
    tasks: Vec<JoinHandle<()>>,
    monitor: JoinHandle<()>,
}

/// Runs all shards of one client
pub struct ShardCoordinator {
    config: GatewayConfig,
    handler: Arc<dyn DispatchHandler>,
    limits_source: Arc<dyn SessionLimitsSource>,
    cancel: CancellationToken,
    events: broadcast::Sender<ShardEvent>,
    running: Option<Running>,
}

impl ShardCoordinator {
    /// Validate `config` and prepare a coordinator that fetches limits over REST
    pub fn new(config: GatewayConfig, handler: Arc<dyn DispatchHandler>) -> Result<Self> {
        config.validate()?;
        let limits_source = Arc::new(RestClient::new(&config.api_base_url, &config.token));
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);

        Ok(Self {
            config,
            handler,
            limits_source,
            cancel: CancellationToken::new(),
            events,
            running: None,
        })
    }

    /// Replace the session-limits source
    pub fn with_limits_source(mut self, source: Arc<dyn SessionLimitsSource>) -> Self {
        self.limits_source = source;
        self
    }

    /// Fetch limits, start the dispatch pool, then spawn every shard
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(GatewayError::NotRunning);
        }

        let limits = self.limits_source.session_limits().await?;
        let total_shards = self.config.shard_count.unwrap_or(limits.shard_count_hint).max(1);
        let window = self.config.identify_window().unwrap_or(limits.reset_after);
        let base_url = self
            .config
            .gateway_url
            .clone()
            .unwrap_or_else(|| limits.url.clone());

        info!(
            shards = total_shards,
            max_concurrency = limits.max_concurrency,
            ?window,
            remaining = limits.remaining,
            "Starting shard coordinator"
        );

        if limits.remaining == 0 {
            warn!(
                "Session start limit exhausted, waiting {:?} before identifying",
                limits.reset_after
            );
            if !sleep_or_cancel(limits.reset_after, &self.cancel).await {
                return Err(GatewayError::NotRunning);
            }
        }

        let gate = Arc::new(RateGate::new(limits.max_concurrency, window));

        let pool = Arc::new(EventDispatchPool::new(
            self.config.dispatch.queue_capacity,
            Arc::clone(&self.handler),
        ));
        pool.start(self.config.dispatch.workers)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut shards = Vec::with_capacity(total_shards as usize);
        let mut tasks = Vec::with_capacity(total_shards as usize);

        for shard_id in 0..total_shards {
            let (connection, handle) = ShardConnection::new(
                self.shard_config(shard_id, total_shards, &base_url),
                Arc::clone(&gate),
                pool.sender(),
                event_tx.clone(),
                self.cancel.child_token(),
            );
            tasks.push(tokio::spawn(connection.run()));
            shards.push(handle);
        }
        drop(event_tx);

        let monitor = tokio::spawn(monitor_events(event_rx, self.events.clone()));

        self.running = Some(Running {
            limits,
            total_shards,
            gate,
            pool,
            shards,
            tasks,
            monitor,
        });
        Ok(())
    }

    /// Stop every shard, drain the dispatch pool and release the gate
    ///
    /// A stopped coordinator cannot be started again.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(running) = self.running.take() else {
            return;
        };
        info!(shards = running.total_shards, "Stopping shard coordinator");

        for (shard_id, task) in running.tasks.into_iter().enumerate() {
            if let Err(e) = task.await {
                error!(shard_id, "Shard task failed: {}", e);
            }
        }
        debug!("All shards stopped");

        running.pool.stop().await;
        running.gate.close();

        if let Err(e) = running.monitor.await {
            error!("Event monitor failed: {}", e);
        }
        info!("Shard coordinator stopped");
    }

    fn shard_config(&self, shard_id: u32, total_shards: u32, base_url: &str) -> ShardConfig {
        ShardConfig {
            shard_id,
            total_shards,
            token: self.config.token.clone(),
            intents: self.config.intents,
            properties: self.config.identify.properties(),
            large_threshold: self.config.large_threshold,
            gateway_url: base_url.to_string(),
            gateway_version: self.config.gateway_version,
            compress: self.config.compress.clone(),
            reconnect_delay: self.config.reconnect.delay(),
            backoff: self.config.reconnect.policy(),
        }
    }

    fn running(&self) -> Result<&Running> {
        self.running.as_ref().ok_or(GatewayError::NotRunning)
    }

    /// Shard owning `routing_key`
    pub fn shard_for(&self, routing_key: u64) -> Result<u32> {
        Ok(shard_for(routing_key, self.running()?.total_shards))
    }

    /// Send a command to the shard owning `routing_key`
    pub async fn send<T: Serialize>(&self, routing_key: u64, op: OpCode, data: &T) -> Result<()> {
        let shard_id = self.shard_for(routing_key)?;
        self.send_to_shard(shard_id, op, data).await
    }

    pub async fn send_to_shard<T: Serialize>(&self, shard_id: u32, op: OpCode, data: &T) -> Result<()> {
        let running = self.running()?;
        let handle = running
            .shards
            .get(shard_id as usize)
            .ok_or(GatewayError::UnknownShard {
                shard_id,
                total: running.total_shards,
            })?;
        handle.send(op, data).await
    }

    /// Snapshot of every shard, by shard id
    pub fn statuses(&self) -> Vec<(u32, ShardSnapshot)> {
        self.running
            .as_ref()
            .map(|running| {
                running
                    .shards
                    .iter()
                    .map(|handle| (handle.shard_id(), handle.snapshot()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when every shard is Ready
    pub fn is_ready(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.shards.iter().all(ShardHandle::is_ready))
    }

    /// Wait until every shard reports Ready
    ///
    /// Fails if a shard stops first.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let running = self.running()?;
        for handle in &running.shards {
            handle.wait_for(ShardStatus::Ready).await?;
        }
        Ok(())
    }

    /// Lifecycle events from all shards
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.events.subscribe()
    }

    pub fn shard(&self, shard_id: u32) -> Option<&ShardHandle> {
        self.running.as_ref()?.shards.get(shard_id as usize)
    }

    pub fn total_shards(&self) -> Option<u32> {
        self.running.as_ref().map(|running| running.total_shards)
    }

    pub fn session_limits(&self) -> Option<&SessionLimits> {
        self.running.as_ref().map(|running| &running.limits)
    }

    pub fn dispatch_stats(&self) -> Option<DispatchStats> {
        self.running.as_ref().map(|running| running.pool.stats())
    }

    pub fn rate_gate_state(&self) -> Option<RateGateState> {
        self.running.as_ref().map(|running| running.gate.state())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ShardCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Log shard events and relay them to subscribers
async fn monitor_events(
    mut events: mpsc::UnboundedReceiver<ShardEvent>,
    relay: broadcast::Sender<ShardEvent>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            ShardEvent::Ready {
                shard_id,
                session_id,
            } => info!(shard_id, session_id = %session_id, "Shard is ready"),
            ShardEvent::Resumed { shard_id } => info!(shard_id, "Shard resumed"),
            ShardEvent::ConnectionLost { shard_id, reason } => {
                warn!(shard_id, "Shard lost its connection: {}", reason)
            }
            ShardEvent::Stopped {
                shard_id,
                reason: Some(reason),
            } => error!(shard_id, "Shard stopped: {}", reason),
            ShardEvent::Stopped { shard_id, reason: None } => debug!(shard_id, "Shard stopped"),
        }
        // No subscribers is fine
        let _ = relay.send(event);
    }
    debug!("Event monitor exiting");
}
