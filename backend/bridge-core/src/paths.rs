//! Detection of the gateway's well-known files.
//!
//! Lookup order:
//! 1. `GATEWAY_HOME` environment variable (explicit override)
//! 2. `~/.gateway` via the `dirs` crate
//!
//! Returns Result, never silently falls back to a wrong path.

use crate::error::PathError;
use crate::{
    GATEWAY_DIR_NAME, GATEWAY_HOME_ENV, GATEWAY_LOG_FILE, GATEWAY_LOGS_DIR, GATEWAY_SOCKET_FILE,
    GATEWAY_TOKEN_FILE,
};

use std::env;
use std::path::{Path, PathBuf};

use log::{debug, info};

/// Gateway file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPaths {
    /// Base directory (e.g., `~/.gateway`).
    pub base_dir: PathBuf,
    /// Bearer token written by the daemon.
    pub token_file: PathBuf,
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Append-only diagnostics log.
    pub log_file: PathBuf,
    /// How the path was determined.
    pub source: PathSource,
}

/// How the path was determined (for debugging/logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSource {
    /// Set via GATEWAY_HOME environment variable.
    EnvVar,
    /// Derived from the user's home directory.
    HomeDir,
}

impl std::fmt::Display for PathSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSource::EnvVar => write!(f, "{GATEWAY_HOME_ENV}"),
            PathSource::HomeDir => write!(f, "home directory"),
        }
    }
}

impl GatewayPaths {
    /// Lay out the gateway files under `base_dir`.
    pub fn under(base_dir: impl AsRef<Path>, source: PathSource) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        Self {
            token_file: base_dir.join(GATEWAY_TOKEN_FILE),
            socket_path: base_dir.join(GATEWAY_SOCKET_FILE),
            log_file: base_dir.join(GATEWAY_LOGS_DIR).join(GATEWAY_LOG_FILE),
            base_dir,
            source,
        }
    }
}

/// Detect gateway paths.
///
/// # Errors
/// Returns [`PathError::Detection`] if neither the override nor a home directory is available.
pub fn detect_gateway_paths() -> Result<GatewayPaths, PathError> {
    if let Ok(custom_dir) = env::var(GATEWAY_HOME_ENV) {
        if !custom_dir.trim().is_empty() {
            info!("Using {GATEWAY_HOME_ENV} override: {custom_dir}");
            return Ok(GatewayPaths::under(custom_dir, PathSource::EnvVar));
        }
    }

    if let Some(home) = dirs::home_dir() {
        let base_dir = home.join(GATEWAY_DIR_NAME);
        debug!("Gateway dir: {}", base_dir.display());
        return Ok(GatewayPaths::under(base_dir, PathSource::HomeDir));
    }

    Err(PathError::detection(format!(
        "Cannot determine gateway directory. Set {GATEWAY_HOME_ENV} environment variable."
    )))
}
