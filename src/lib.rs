//! Shardline - sharded gateway client
//!
//! This crate ties the workspace libraries together for the binaries.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//! - **gateway**: Shards, rate gate, dispatch pool and coordinator (re-exported from workspace)
//! - **gatesocket**: WebSocket transport (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use shardline::bin_common::{load_config_from_env, ConfigType};
//! use shardline::gateway::ShardCoordinator;
//! ```

// Re-export workspace libraries for convenience
pub use gatesocket;
pub use gateway;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod runner;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
    pub use runner::{BinaryRunner, RunConfig};
}
