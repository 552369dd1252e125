pub mod config;
pub mod paths;
pub mod rpc;
pub mod transport;

pub use config::ConfigError;
pub use paths::PathError;
pub use rpc::RpcError;
pub use transport::TransportError;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Paths(#[from] paths::PathError),

    #[error(transparent)]
    Rpc(#[from] rpc::RpcError),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}
