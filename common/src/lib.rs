//! Shared building blocks for the gateway bridge workspace.
//!
//! This crate holds the small value types every other crate leans on:
//!
//! - **common** (this crate): error locations and secret wrappers
//! - **bridge-core**: connection lifecycle, RPC correlation, heartbeat, reconnects
//! - **bridge-host**: process wiring (logging, config, stdin/stdout relay)
//!
//! Nothing here performs I/O.

pub mod error;
pub mod redacted_token;

pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use redacted_token::RedactedToken;
