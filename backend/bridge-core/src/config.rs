//! Bridge configuration loaded from `{config_dir}/bridge.json`.
//!
//! Every field has a serde default, so a partial file (or none at all) yields a
//! working configuration. Paths left unset are resolved through
//! [`GatewayPaths`](crate::paths::GatewayPaths).

use crate::GATEWAY_DEFAULT_URL;
use crate::error::config::ConfigError;
use crate::paths::GatewayPaths;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

const CONFIG_FILE_NAME: &str = "bridge.json";
const CONFIG_VERSION: u32 = 1;

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Request URI for the WebSocket handshake carried over the Unix socket.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            socket_path: None,
            token_path: None,
            log_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub default_call_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            default_call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl TimingConfig {
    /// Socket connect plus WebSocket handshake.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_exponent: default_max_exponent(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            gateway: GatewayConfig::default(),
            timing: TimingConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_url() -> String {
    GATEWAY_DEFAULT_URL.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_auth_timeout_ms() -> u64 {
    5_000
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_max_exponent() -> u32 {
    3
}
fn default_jitter_ms() -> u64 {
    250
}

// ============================================
// IMPLEMENTATION
// ============================================

impl BridgeConfig {
    /// Load config from {config_dir}/bridge.json.
    ///
    /// # Returns
    ///
    /// Returns `Ok(BridgeConfig)` if loaded successfully or defaults if file missing.
    /// Returns `Err(ConfigError)` if file exists but is corrupted/invalid.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {}", e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: BridgeConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {}", e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/bridge.json using atomic write.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation, serialization, the write or the
    /// final rename fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::write(config_dir, e))?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::write(&temp_path, e))?;

        // Atomic rename (POSIX guarantees atomicity)
        std::fs::rename(&temp_path, &config_path)
            .map_err(|e| ConfigError::write(&config_path, e))?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::validation(format!(
                "Invalid version: {} (expected 1-{})",
                self.version, CONFIG_VERSION
            )));
        }

        let url = Url::parse(&self.gateway.url).map_err(|e| {
            ConfigError::validation(format!("Invalid gateway URL {}: {e}", self.gateway.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::validation(format!(
                "Gateway URL must use ws:// or wss://, got {}",
                self.gateway.url
            )));
        }

        let timing = &self.timing;
        if timing.connect_timeout_ms == 0
            || timing.auth_timeout_ms == 0
            || timing.heartbeat_interval_ms == 0
            || timing.heartbeat_timeout_ms == 0
            || timing.default_call_timeout_ms == 0
        {
            return Err(ConfigError::validation("Timeouts and intervals must be non-zero"));
        }

        if timing.heartbeat_timeout_ms >= timing.heartbeat_interval_ms {
            return Err(ConfigError::validation(format!(
                "Heartbeat timeout ({}ms) must be shorter than the interval ({}ms)",
                timing.heartbeat_timeout_ms, timing.heartbeat_interval_ms
            )));
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::validation("Reconnect base delay must be non-zero"));
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::validation(format!(
                "Reconnect max delay ({}ms) is below the base delay ({}ms)",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }

        Ok(())
    }

    /// Socket path from config, falling back to the detected gateway paths.
    pub fn socket_path(&self, paths: &GatewayPaths) -> PathBuf {
        self.gateway
            .socket_path
            .clone()
            .unwrap_or_else(|| paths.socket_path.clone())
    }

    pub fn token_path(&self, paths: &GatewayPaths) -> PathBuf {
        self.gateway
            .token_path
            .clone()
            .unwrap_or_else(|| paths.token_file.clone())
    }

    pub fn log_path(&self, paths: &GatewayPaths) -> PathBuf {
        self.gateway
            .log_path
            .clone()
            .unwrap_or_else(|| paths.log_file.clone())
    }
}
