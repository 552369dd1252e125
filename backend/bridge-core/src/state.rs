//! Observable bridge state: the four connection states, the transition events
//! forwarded to the UI layer and the `getState` snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Authenticated,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// One transition, as forwarded to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set when a reconnect has been scheduled, so the UI can render a countdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_in_ms: Option<u64>,
    pub reconnect_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_id: Option<String>,
}

/// Result of [`GatewayBridge::state`](crate::GatewayBridge::state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSnapshot {
    pub state: ConnectionState,
    pub reconnect_count: u64,
    pub connect_id: Option<String>,
    pub last_reason: Option<String>,
}

/// Everything the bridge forwards to the UI layer, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    State(StateChange),
    /// An unsolicited gateway frame, verbatim.
    Message(String),
}
