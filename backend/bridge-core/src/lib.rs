pub mod bridge;
pub mod config;
pub mod correlator;
pub mod diagnostics;
pub mod error;
pub mod heartbeat;
pub mod machine;
pub mod paths;
pub mod protocol;
pub mod reconnect;
pub mod state;
pub mod token;

mod transport;
#[cfg(test)]
mod tests;

pub use bridge::{BridgeEvents, GatewayBridge};
pub use state::{BridgeEvent, BridgeSnapshot, ConnectionState, StateChange};

pub const GATEWAY_DIR_NAME: &str = ".gateway";
pub const GATEWAY_HOME_ENV: &str = "GATEWAY_HOME";
pub const GATEWAY_TOKEN_FILE: &str = "gateway-token";
pub const GATEWAY_SOCKET_FILE: &str = "gateway.sock";
pub const GATEWAY_LOGS_DIR: &str = "logs";
pub const GATEWAY_LOG_FILE: &str = "gateway.log";
pub const GATEWAY_HOSTNAME: &str = "localhost";
pub const GATEWAY_DEFAULT_URL: &str = const_format::concatcp!("ws://", GATEWAY_HOSTNAME);
