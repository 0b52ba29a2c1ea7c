//! Integration test: Configuration loading
//!
//! Tests the bin_common path helpers and loading a gateway config from disk.

use shardline::bin_common::{load_config_from_env, ConfigType};
use shardline::gateway::{ConfigError, GatewayConfig, GatewayIntents};
use std::env;
use std::io::Write;

#[test]
fn test_gateway_config_default_path() {
    // Clear env var to test default
    env::remove_var("GATEWAY_CONFIG_PATH");

    let config_path = load_config_from_env(ConfigType::Gateway);
    assert_eq!(config_path.to_str().unwrap(), "config/gateway.yaml");
}

#[test]
fn test_custom_config() {
    let custom = ConfigType::Custom("custom/path.yaml".to_string());
    let config_path = load_config_from_env(custom);

    assert_eq!(config_path.to_str().unwrap(), "custom/path.yaml");
}

#[test]
fn test_sample_config_parses() {
    let yaml = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/gateway.yaml"))
        .unwrap();
    let config = GatewayConfig::from_yaml(&yaml).unwrap();

    assert_eq!(config.gateway_version, 10);
    assert!(config.intents.contains(GatewayIntents::GUILD_MESSAGES));
    assert_eq!(config.dispatch.workers, 4);
    assert_eq!(config.reconnect.max_attempts, Some(10));
    assert_eq!(config.identify_window_ms, Some(5000));
}

// The only test touching GATEWAY_TOKEN, so parallel tests cannot race on it
#[test]
fn test_load_reads_token_from_env() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "shard_count: 2\ndispatch:\n  workers: 8").unwrap();

    env::remove_var("GATEWAY_TOKEN");
    let missing = GatewayConfig::load(file.path());
    assert!(matches!(missing, Err(ConfigError::EnvVarMissing(_))));

    env::set_var("GATEWAY_TOKEN", "secret-token");
    let config = GatewayConfig::load(file.path()).unwrap();
    env::remove_var("GATEWAY_TOKEN");

    assert_eq!(config.token, "secret-token");
    assert_eq!(config.shard_count, Some(2));
    assert_eq!(config.dispatch.workers, 8);
    assert_eq!(config.dispatch.queue_capacity, 1024);
}

#[test]
fn test_load_missing_file() {
    let result = GatewayConfig::load("does/not/exist.yaml");
    assert!(matches!(result, Err(ConfigError::FileError(_))));
}
