//! Wire envelope
//!
//! Every gateway message has the shape `{"op": int, "d": any, "s": int|null, "t": string|null}`.
//! Inbound payloads stay as raw JSON so dispatch events reach the application
//! without being decoded and re-encoded by the shard.

use super::OpCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// One inbound gateway message, parsed once per frame
#[derive(Debug, Deserialize)]
pub struct GatewayEnvelope {
    pub op: OpCode,

    #[serde(default)]
    pub d: Option<Box<RawValue>>,

    /// Sequence number (dispatch only)
    #[serde(default)]
    pub s: Option<u64>,

    /// Event name (dispatch only)
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayEnvelope {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    #[inline]
    pub fn is_dispatch(&self) -> bool {
        self.op == OpCode::Dispatch
    }

    pub fn event_type(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Raw JSON text of `d`, `"null"` when absent
    pub fn raw_payload(&self) -> &str {
        self.d.as_deref().map_or("null", RawValue::get)
    }

    /// Decode `d` into `T`
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.raw_payload())
    }
}

impl std::fmt::Display for GatewayEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.t, self.s) {
            (Some(t), Some(s)) => write!(f, "GatewayEnvelope(op={}, t={}, s={})", self.op, t, s),
            (Some(t), None) => write!(f, "GatewayEnvelope(op={}, t={})", self.op, t),
            _ => write!(f, "GatewayEnvelope(op={})", self.op),
        }
    }
}

/// One outbound gateway message: `{"op": .., "d": ..}`
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame<T = serde_json::Value> {
    pub op: OpCode,
    pub d: T,
}

impl<T: Serialize> OutboundFrame<T> {
    pub fn new(op: OpCode, d: T) -> Self {
        Self { op, d }
    }
}
