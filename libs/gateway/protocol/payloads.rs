//! Payload definitions for the lifecycle op codes

use super::GatewayIntents;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,

    pub intents: GatewayIntents,

    pub properties: IdentifyProperties,

    /// `[shard_id, total_shards]`
    pub shard: [u32; 2],

    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
}

/// Connection properties reported on Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    pub fn new(os: impl Into<String>, browser: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            browser: browser.into(),
            device: device.into(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new(std::env::consts::OS, "shardline", "shardline")
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

/// The subset of the READY dispatch the shard needs to resume later
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,

    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_serialization() {
        let payload = IdentifyPayload {
            token: "secret".to_string(),
            intents: GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES,
            properties: IdentifyProperties::new("linux", "shardline", "shardline"),
            shard: [1, 4],
            large_threshold: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["token"], "secret");
        assert_eq!(value["intents"], 513);
        assert_eq!(value["shard"], serde_json::json!([1, 4]));
        assert_eq!(value["properties"]["os"], "linux");
        assert!(value.get("large_threshold").is_none());
    }

    #[test]
    fn test_resume_serialization() {
        let payload = ResumePayload {
            token: "secret".to_string(),
            session_id: "abc".to_string(),
            seq: 99,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"token":"secret","session_id":"abc","seq":99}"#);
    }

    #[test]
    fn test_ready_ignores_unknown_fields() {
        let ready: ReadyPayload = serde_json::from_str(
            r#"{"v":10,"session_id":"s1","resume_gateway_url":"wss://resume.example","user":{"id":"1"}}"#,
        )
        .unwrap();
        assert_eq!(ready.session_id, "s1");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://resume.example"));
    }

    #[test]
    fn test_ready_without_resume_url() {
        let ready: ReadyPayload = serde_json::from_str(r#"{"session_id":"s2"}"#).unwrap();
        assert!(ready.resume_gateway_url.is_none());
    }
}
