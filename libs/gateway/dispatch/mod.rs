//! Dispatch pipeline
//!
//! ```text
//! Shard 0 ─┐
//! Shard 1 ─┼──> DispatchSender ──> bounded queue ──> worker 0..N ──> DispatchHandler
//! Shard N ─┘        (backpressure)                    (permit pool)
//! ```
//!
//! Shards own a cloned [`DispatchSender`]; the pool owns the receiving end and
//! a fixed set of workers. A failing or panicking handler call affects only
//! the item it was processing.

pub mod handler;
pub mod pool;

pub use handler::{handler_fn, DispatchHandler, DispatchItem, FnHandler};
pub use pool::{DispatchError, DispatchSender, DispatchStats, EventDispatchPool};
