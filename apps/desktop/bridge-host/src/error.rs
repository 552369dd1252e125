use bridge_core::error::{ConfigError, CoreError, PathError};

use common::ErrorLocation;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the host process.
///
/// Printed to stdout as JSON for the embedding UI, so every variant stays
/// serializable and carries its origin.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeHostError {
    /// Error from this app
    #[error("Host Error: {message} {location}")]
    Host {
        message: String,
        location: ErrorLocation,
    },

    /// Error from bridge-core (config, paths)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },

    /// A line from stdin that could not be understood
    #[error("Input Error: {message} {location}")]
    Input {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl BridgeHostError {
    #[track_caller]
    pub fn input(message: impl Into<String>) -> Self {
        BridgeHostError::Input {
            message: message.into(),
            location: ErrorLocation::caller(),
        }
    }
}

impl From<CoreError> for BridgeHostError {
    #[track_caller]
    fn from(error: CoreError) -> Self {
        BridgeHostError::Core {
            message: error.to_string(),
            location: ErrorLocation::caller(),
        }
    }
}

impl From<ConfigError> for BridgeHostError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        BridgeHostError::from(CoreError::from(error))
    }
}

impl From<PathError> for BridgeHostError {
    #[track_caller]
    fn from(error: PathError) -> Self {
        BridgeHostError::from(CoreError::from(error))
    }
}

impl From<std::io::Error> for BridgeHostError {
    #[track_caller]
    fn from(error: std::io::Error) -> Self {
        BridgeHostError::Io {
            message: error.to_string(),
            location: ErrorLocation::caller(),
        }
    }
}
