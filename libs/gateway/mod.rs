//! Gateway client core
//!
//! Keeps a live session with a chat-platform gateway over one or more
//! WebSocket connections ("shards") and feeds inbound dispatch events into a
//! bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//!                         ┌──────────────────┐
//!   GET /gateway/bot ───> │ ShardCoordinator │ ──> broadcast<ShardEvent>
//!                         └────────┬─────────┘
//!                 ┌────────────────┼────────────────┐
//!                 ▼                ▼                ▼
//!           ShardConnection  ShardConnection  ShardConnection ── RateGate (shared)
//!                 │                │                │
//!                 └───────> DispatchSender <────────┘
//!                                  │ bounded queue
//!                                  ▼
//!                          EventDispatchPool ──> DispatchHandler
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gateway::{handler_fn, GatewayConfig, ShardCoordinator};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::load("config/gateway.yaml")?;
//! let handler = Arc::new(handler_fn(|item| async move {
//!     println!("{:?} on shard {}", item.event_type(), item.shard_id);
//!     Ok(())
//! }));
//!
//! let mut coordinator = ShardCoordinator::new(config, handler)?;
//! coordinator.start().await?;
//! coordinator.wait_until_ready().await?;
//! // ...
//! coordinator.stop().await;
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod rate_gate;
pub mod rest;
pub mod shard;
pub mod utils;

pub use config::{ConfigError, GatewayConfig};
pub use coordinator::ShardCoordinator;
pub use dispatch::{
    handler_fn, DispatchError, DispatchHandler, DispatchItem, DispatchSender, DispatchStats,
    EventDispatchPool,
};
pub use error::{GatewayError, Result};
pub use logging::init_tracing;
pub use protocol::{GatewayEnvelope, GatewayIntents, OpCode, OutboundFrame};
pub use rate_gate::{RateGate, RateGateError, RateGateState};
pub use rest::{RestClient, RestError, SessionLimits, SessionLimitsSource, StaticSessionLimits};
pub use shard::{
    shard_for, ShardConfig, ShardConnection, ShardEvent, ShardHandle, ShardSnapshot, ShardStatus,
};
pub use utils::{sleep_or_cancel, ShutdownManager};
