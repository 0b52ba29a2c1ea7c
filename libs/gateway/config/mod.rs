//! Gateway client configuration
//!
//! Loaded from YAML; the bot token never lives in the file and is read from
//! `GATEWAY_TOKEN` (a `.env` file is honoured).

use crate::protocol::{GatewayIntents, IdentifyProperties};
use gatesocket::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const TOKEN_ENV: &str = "GATEWAY_TOKEN";
pub const GATEWAY_URL_ENV: &str = "GATEWAY_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level gateway client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// REST base URL used for the session-limits call
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Gateway WebSocket URL; when unset the URL from the session-limits call is used
    #[serde(default)]
    pub gateway_url: Option<String>,

    #[serde(default = "default_gateway_version")]
    pub gateway_version: u8,

    /// Passed through as the `compress` query parameter
    #[serde(default)]
    pub compress: Option<String>,

    #[serde(default)]
    pub intents: GatewayIntents,

    /// Overrides the server's recommended shard count
    #[serde(default)]
    pub shard_count: Option<u32>,

    #[serde(default)]
    pub large_threshold: Option<u32>,

    #[serde(default)]
    pub identify: IdentifyConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Overrides the identify window reported by the server
    #[serde(default)]
    pub identify_window_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bot token from the environment (not in YAML)
    #[serde(skip)]
    pub token: String,
}

/// Properties reported on Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyConfig {
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_client_name")]
    pub browser: String,
    #[serde(default = "default_client_name")]
    pub device: String,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            os: default_os(),
            browser: default_client_name(),
            device: default_client_name(),
        }
    }
}

impl IdentifyConfig {
    pub fn properties(&self) -> IdentifyProperties {
        IdentifyProperties::new(&self.os, &self.browser, &self.device)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Fixed wait after a server-requested reconnect
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive failed attempts before a shard gives up; unset retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Backoff schedule for transport failures
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::exponential(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
            self.max_attempts,
        )
    }
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_version() -> u8 {
    10
}

fn default_os() -> String {
    std::env::consts::OS.to_string()
}

fn default_client_name() -> String {
    "shardline".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> Option<usize> {
    Some(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load YAML from `config_path`, read the token from the environment and validate
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&yaml_content)?;

        // Don't fail if .env doesn't exist
        dotenv::dotenv().ok();
        config.apply_env()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching the environment or validating
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        self.token = std::env::var(TOKEN_ENV)
            .map_err(|_| ConfigError::EnvVarMissing(TOKEN_ENV.to_string()))?;

        if let Ok(url) = std::env::var(GATEWAY_URL_ENV) {
            info!("Overriding gateway URL from environment variable");
            self.gateway_url = Some(url);
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::ValidationError("token cannot be empty".to_string()));
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(
                "api_base_url must be an http(s) URL".to_string(),
            ));
        }

        if let Some(url) = &self.gateway_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::ValidationError(
                    "gateway_url must be a ws:// or wss:// URL".to_string(),
                ));
            }
        }

        if self.gateway_version == 0 {
            return Err(ConfigError::ValidationError(
                "gateway_version must be greater than 0".to_string(),
            ));
        }

        if self.shard_count == Some(0) {
            return Err(ConfigError::ValidationError(
                "shard_count must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.workers == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.workers must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.backoff_initial_ms > self.reconnect.backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "reconnect.backoff_initial_ms must be <= reconnect.backoff_max_ms".to_string(),
            ));
        }

        if self.identify_window_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "identify_window_ms must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn identify_window(&self) -> Option<Duration> {
        self.identify_window_ms.map(Duration::from_millis)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  API base URL: {}", self.api_base_url);
        info!(
            "  Gateway URL: {}",
            self.gateway_url.as_deref().unwrap_or("(from session limits)")
        );
        info!("  Gateway version: {}", self.gateway_version);
        info!("  Intents: {:#x}", self.intents.bits());
        match self.shard_count {
            Some(count) => info!("  Shards: {}", count),
            None => info!("  Shards: (recommended by server)"),
        }
        info!(
            "  Dispatch: {} workers, queue of {}",
            self.dispatch.workers, self.dispatch.queue_capacity
        );
        info!("  Reconnect delay: {} ms", self.reconnect.delay_ms);
        info!("  Log level: {}", self.log_level);
    }
}
