//! Shard connections
//!
//! A shard is one gateway connection. [`ShardConnection`] runs the protocol
//! state machine on its own task; its owner keeps a [`ShardHandle`] to send
//! commands and observe status, and receives [`ShardEvent`]s on a channel.

pub mod command;
pub mod connection;
pub mod heartbeat;
pub mod state;

pub use command::{ShardCommand, ShardHandle};
pub use connection::{ShardConfig, ShardConnection};
pub use heartbeat::{Heartbeat, HeartbeatTracker};
pub use state::{ShardEvent, ShardSessionState, ShardSnapshot, ShardStatus};

/// Shard that owns a routing key: `(key >> 22) % total_shards`
///
/// `total_shards` of 0 is treated as 1.
#[inline]
pub fn shard_for(routing_key: u64, total_shards: u32) -> u32 {
    ((routing_key >> 22) % u64::from(total_shards.max(1))) as u32
}
