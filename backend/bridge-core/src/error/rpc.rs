use common::ErrorLocation;

use std::time::Duration;

use thiserror::Error as ThisError;

#[derive(Debug, Clone, ThisError)]
pub enum RpcError {
    #[error("Timeout Error: {method} got no response within {timeout:?} {location}")]
    Timeout {
        method: String,
        timeout: Duration,
        location: ErrorLocation,
    },

    /// The gateway answered with `{id, error}`.
    #[error("Remote Error: {message} {location}")]
    Remote {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connection Closed Error: {message} {location}")]
    ConnectionClosed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Connected Error: {message} {location}")]
    NotConnected {
        message: String,
        location: ErrorLocation,
    },

    #[error("Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Bridge Stopped Error: {message} {location}")]
    BridgeStopped {
        message: String,
        location: ErrorLocation,
    },
}

impl RpcError {
    #[track_caller]
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        RpcError::Timeout {
            method: method.into(),
            timeout,
            location: ErrorLocation::caller(),
        }
    }

    #[track_caller]
    pub fn remote(message: impl Into<String>) -> Self {
        RpcError::Remote {
            message: message.into(),
            location: ErrorLocation::caller(),
        }
    }

    #[track_caller]
    pub fn connection_closed() -> Self {
        RpcError::ConnectionClosed {
            message: "Connection closed".to_string(),
            location: ErrorLocation::caller(),
        }
    }

    #[track_caller]
    pub fn not_connected() -> Self {
        RpcError::NotConnected {
            message: "Gateway socket is not open".to_string(),
            location: ErrorLocation::caller(),
        }
    }

    #[track_caller]
    pub fn bridge_stopped() -> Self {
        RpcError::BridgeStopped {
            message: "Bridge task is not running".to_string(),
            location: ErrorLocation::caller(),
        }
    }

    /// Short message without the location suffix, used as a disconnect reason.
    pub fn message(&self) -> &str {
        match self {
            RpcError::Timeout { .. } => "timeout",
            RpcError::Remote { message, .. }
            | RpcError::ConnectionClosed { message, .. }
            | RpcError::NotConnected { message, .. }
            | RpcError::Encode { message, .. }
            | RpcError::BridgeStopped { message, .. } => message,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        RpcError::Encode {
            message: error.to_string(),
            location: ErrorLocation::caller(),
        }
    }
}
