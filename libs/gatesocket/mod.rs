//! # Gatesocket
//!
//! Thin WebSocket transport used by the gateway shards.
//!
//! ## Features
//!
//! - **Single owned connection**: `connect` tears down any previous socket first
//! - **Whole messages only**: fragmented frames are reassembled before `receive` returns
//! - **JSON envelopes**: `send` writes `{"op": .., "d": ..}` as one text message
//! - **Best-effort close**: `close` never fails and always releases the handle
//! - **Reconnect policies**: fixed delay and capped exponential backoff
//!
//! The transport has no protocol knowledge. Interpreting opcodes is the
//! caller's job.

pub mod core;
pub mod traits;

pub use crate::core::transport::{TransportMetrics, TransportSocket};
pub use traits::*;

/// Type alias for Result with SocketError
pub type Result<T> = std::result::Result<T, traits::SocketError>;
