//! Connects every shard and logs each dispatch event as it arrives
//!
//! Usage: GATEWAY_TOKEN=... cargo run --bin gateway_tail [config.yaml]

use anyhow::Result;
use shardline::bin_common::{load_config_from_env, parse_args, BinaryRunner, ConfigType, RunConfig};
use shardline::gateway::{
    handler_fn, init_tracing, GatewayConfig, ShardCoordinator, ShardEvent, ShardStatus,
    ShutdownManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

struct GatewayTail {
    run_config: RunConfig,
    coordinator: ShardCoordinator,
    shutdown: ShutdownManager,
}

impl GatewayTail {
    fn new(config: GatewayConfig) -> Result<Self> {
        let handler = Arc::new(handler_fn(|item| async move {
            info!(
                shard_id = item.shard_id,
                seq = ?item.sequence(),
                bytes = item.payload().len(),
                "{}",
                item.event_type().unwrap_or("UNKNOWN")
            );
            Ok(())
        }));

        Ok(Self {
            run_config: RunConfig::new("Gateway Tail"),
            coordinator: ShardCoordinator::new(config, handler)?,
            shutdown: ShutdownManager::new(),
        })
    }

    fn log_status(&self) {
        for (shard_id, snapshot) in self.coordinator.statuses() {
            info!(
                shard_id,
                status = %snapshot.status,
                latency = ?snapshot.latency,
                "Shard status"
            );
        }
        if let Some(stats) = self.coordinator.dispatch_stats() {
            info!(
                processed = stats.processed,
                failed = stats.failed,
                panicked = stats.panicked,
                "Dispatch stats"
            );
        }
    }
}

impl BinaryRunner for GatewayTail {
    async fn run(&mut self) -> Result<Option<String>> {
        self.shutdown.spawn_signal_handler();
        self.coordinator.start().await?;

        let mut events = self.coordinator.subscribe();
        let mut status_timer = tokio::time::interval(self.run_config.status_interval());

        while self.shutdown.is_running() {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = status_timer.tick() => self.log_status(),
                event = events.recv() => match event {
                    Ok(ShardEvent::Stopped { shard_id, reason: Some(reason) }) => {
                        warn!(shard_id, "Shard gave up: {}", reason);
                        let statuses = self.coordinator.statuses();
                        if statuses.iter().all(|(_, s)| s.status == ShardStatus::Stopped) {
                            warn!("Every shard has stopped, shutting down");
                            self.shutdown.trigger();
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed shard events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        let stats = self.coordinator.dispatch_stats();
        self.coordinator.stop().await;

        Ok(stats.map(|stats| {
            format!(
                "Dispatched {} events ({} failed, {} panicked)",
                stats.processed, stats.failed, stats.panicked
            )
        }))
    }

    fn config(&self) -> &RunConfig {
        &self.run_config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load config first (before logging is initialized)
    let config_path = parse_args()
        .into_iter()
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| load_config_from_env(ConfigType::Gateway));
    let config = GatewayConfig::load(&config_path)?;

    init_tracing(&config.log_level);
    config.log();

    let mut app = GatewayTail::new(config)?;
    app.execute().await
}
