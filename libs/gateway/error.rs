//! Top-level error type for the gateway client

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::protocol::OpCode;
use crate::rate_gate::RateGateError;
use crate::rest::RestError;
use gatesocket::SocketError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session limits request failed: {0}")]
    Rest(#[from] RestError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Transport error: {0}")]
    Socket(#[from] SocketError),

    #[error("Rate gate error: {0}")]
    RateGate(#[from] RateGateError),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0} cannot be sent by applications")]
    ForbiddenOpcode(OpCode),

    #[error("Shard {shard_id} does not exist ({total} shards)")]
    UnknownShard { shard_id: u32, total: u32 },

    #[error("Shard {0} has stopped")]
    ShardStopped(u32),

    #[error("Coordinator is not running")]
    NotRunning,

    #[error("Coordinator already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
