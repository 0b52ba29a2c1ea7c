//! Gateway wire protocol
//!
//! Op codes, the `{op, d, s, t}` envelope, lifecycle payloads, intents and
//! close code classification.

pub mod close_codes;
pub mod envelope;
pub mod intents;
pub mod opcodes;
pub mod payloads;
pub mod url;

pub use close_codes::{close_action, CloseAction, CloseCode};
pub use envelope::{GatewayEnvelope, OutboundFrame};
pub use intents::GatewayIntents;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload};
pub use url::gateway_url;

/// Dispatch event names the shard handles itself
pub const EVENT_READY: &str = "READY";
pub const EVENT_RESUMED: &str = "RESUMED";
