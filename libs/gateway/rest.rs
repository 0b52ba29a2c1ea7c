//! Session-limits bootstrap call
//!
//! The only REST request the gateway core makes: `GET /gateway/bot`, which
//! reports the gateway URL, the recommended shard count and the identify
//! concurrency bucket.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Deserialization failed: {0}")]
    DeserializeFailed(String),
}

pub type Result<T> = std::result::Result<T, RestError>;

/// Wire shape of `session_start_limit`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the limit resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

/// Wire shape of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBotResponse {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Limits the coordinator sizes itself from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    pub url: String,
    pub shard_count_hint: u32,
    pub max_concurrency: u32,
    pub reset_after: Duration,
    pub remaining: u32,
    pub total: u32,
}

impl From<GatewayBotResponse> for SessionLimits {
    fn from(response: GatewayBotResponse) -> Self {
        let limit = response.session_start_limit;
        Self {
            url: response.url,
            shard_count_hint: response.shards,
            max_concurrency: limit.max_concurrency,
            reset_after: Duration::from_millis(limit.reset_after),
            remaining: limit.remaining,
            total: limit.total,
        }
    }
}

/// Where session limits come from
#[async_trait]
pub trait SessionLimitsSource: Send + Sync {
    async fn session_limits(&self) -> Result<SessionLimits>;
}

/// REST client for the bootstrap call
pub struct RestClient {
    base_url: String,
    token: String,
    client: Client,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: Client::new(),
        }
    }

    /// `GET {base_url}/gateway/bot`
    pub async fn get_gateway_bot(&self) -> Result<GatewayBotResponse> {
        let url = format!("{}/gateway/bot", self.base_url);

        debug!("Fetching session limits from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| RestError::DeserializeFailed(e.to_string()))
    }
}

#[async_trait]
impl SessionLimitsSource for RestClient {
    async fn session_limits(&self) -> Result<SessionLimits> {
        let response = self.get_gateway_bot().await?;
        debug!(
            shards = response.shards,
            max_concurrency = response.session_start_limit.max_concurrency,
            remaining = response.session_start_limit.remaining,
            "Session limits fetched"
        );
        Ok(response.into())
    }
}

/// Fixed limits, for tests and for deployments that skip the REST call
#[derive(Debug, Clone)]
pub struct StaticSessionLimits(pub SessionLimits);

#[async_trait]
impl SessionLimitsSource for StaticSessionLimits {
    async fn session_limits(&self) -> Result<SessionLimits> {
        Ok(self.0.clone())
    }
}
