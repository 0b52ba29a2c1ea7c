//! Shared error and policy types for the transport.

pub mod error;
pub mod reconnect;

pub use error::{Result, SocketError};
pub use reconnect::ReconnectPolicy;
