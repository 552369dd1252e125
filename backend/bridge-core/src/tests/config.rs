use crate::GATEWAY_DEFAULT_URL;
use crate::config::BridgeConfig;
use crate::error::ConfigError;
use crate::paths::{GatewayPaths, PathSource};

use std::path::PathBuf;

use tempfile::TempDir;

/// **VALUE**: Verifies a missing config file yields the documented defaults.
///
/// **WHY THIS MATTERS**: First launch has no bridge.json; startup must not fail.
#[test]
fn given_no_config_file_when_load_then_defaults() {
    let temp = TempDir::new().unwrap();

    let config = BridgeConfig::load(temp.path()).unwrap();

    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.gateway.url, GATEWAY_DEFAULT_URL);
    assert_eq!(config.timing.connect_timeout_ms, 5_000);
    assert_eq!(config.timing.auth_timeout_ms, 5_000);
    assert_eq!(config.timing.heartbeat_interval_ms, 10_000);
    assert_eq!(config.timing.heartbeat_timeout_ms, 5_000);
    assert_eq!(config.timing.default_call_timeout_ms, 30_000);
    assert_eq!(config.reconnect.base_delay_ms, 1_000);
    assert_eq!(config.reconnect.max_delay_ms, 10_000);
    assert_eq!(config.reconnect.max_exponent, 3);
    assert_eq!(config.reconnect.jitter_ms, 250);
}

/// **VALUE**: Verifies save then load preserves overrides, and that partial files fill
/// the rest from defaults.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[serde(default)]` making every field required.
#[test]
fn given_partial_file_when_load_then_missing_fields_defaulted() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("bridge.json"),
        r#"{ "gateway": { "socket_path": "/tmp/gw.sock" }, "timing": { "auth_timeout_ms": 1500 } }"#,
    )
    .unwrap();

    let config = BridgeConfig::load(temp.path()).unwrap();

    assert_eq!(
        config.gateway.socket_path,
        Some(PathBuf::from("/tmp/gw.sock"))
    );
    assert_eq!(config.timing.auth_timeout_ms, 1500);
    assert_eq!(config.timing.heartbeat_interval_ms, 10_000);
    assert_eq!(config.version, 1);
}

#[test]
fn given_modified_config_when_saved_then_reloads_identically_and_no_temp_left() {
    let temp = TempDir::new().unwrap();
    let mut config = BridgeConfig::default();
    config.reconnect.jitter_ms = 0;
    config.gateway.token_path = Some(PathBuf::from("/run/gw/token"));

    config.save(temp.path()).unwrap();

    assert_eq!(BridgeConfig::load(temp.path()).unwrap(), config);
    assert!(!temp.path().join("bridge.json.tmp").exists());
}

#[test]
fn given_corrupt_file_when_load_then_parse_error() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("bridge.json"), "{ nope").unwrap();

    let result = BridgeConfig::load(temp.path());

    assert!(matches!(result, Err(ConfigError::ParseError { .. })));
}

/// **VALUE**: Verifies validation rejects values the bridge cannot run with.
///
/// **BUG THIS CATCHES**: Would catch a heartbeat timeout that can never fire before the
/// next interval, or a zero base delay that turns reconnect into a busy loop.
#[test]
fn given_invalid_values_when_validate_then_rejected() {
    let mutations: Vec<fn(&mut BridgeConfig)> = vec![
        |c| c.version = 0,
        |c| c.version = 99,
        |c| c.gateway.url = "not a url".to_string(),
        |c| c.gateway.url = "http://localhost".to_string(),
        |c| c.timing.connect_timeout_ms = 0,
        |c| c.timing.auth_timeout_ms = 0,
        |c| c.timing.heartbeat_timeout_ms = c.timing.heartbeat_interval_ms,
        |c| c.reconnect.base_delay_ms = 0,
        |c| c.reconnect.max_delay_ms = 10,
    ];

    for (i, mutate) in mutations.into_iter().enumerate() {
        let mut config = BridgeConfig::default();
        mutate(&mut config);
        assert!(
            matches!(config.validate(), Err(ConfigError::ValidationError { .. })),
            "mutation {i} should fail validation"
        );
    }

    assert!(BridgeConfig::default().validate().is_ok());
}

#[test]
fn given_path_overrides_when_resolving_then_override_wins_over_detected() {
    let paths = GatewayPaths::under("/home/u/.gateway", PathSource::HomeDir);
    let mut config = BridgeConfig::default();

    assert_eq!(config.socket_path(&paths), paths.socket_path);
    assert_eq!(config.token_path(&paths), paths.token_file);
    assert_eq!(config.log_path(&paths), paths.log_file);

    config.gateway.socket_path = Some(PathBuf::from("/tmp/other.sock"));
    assert_eq!(config.socket_path(&paths), PathBuf::from("/tmp/other.sock"));
}
