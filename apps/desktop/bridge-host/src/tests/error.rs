// Unit tests for error module
// Errors are printed as JSON lines, so serialization is part of the contract

use crate::error::BridgeHostError;

use bridge_core::error::ConfigError;

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Tests that errors serialize with their variant tag and message.
///
/// **WHY THIS MATTERS**: The embedding UI parses stdout; an error that fails to serialize
/// would surface as nothing at all.
///
/// **BUG THIS CATCHES**: Would catch removing `#[derive(Serialize)]` or changing the tag layout.
#[test]
fn given_host_error_when_serialized_then_tagged_with_variant() {
    // GIVEN: A BridgeHostError
    let err = BridgeHostError::Input {
        message: String::from("Unknown command :nope"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Serializing to JSON
    let json = serde_json::to_value(&err).expect("Error should be serializable");

    // THEN: Tag and message are present
    assert_eq!(json["type"], "Input");
    assert_eq!(json["data"]["message"], "Unknown command :nope");
}

#[test]
fn given_config_error_when_converted_then_core_variant_keeps_message() {
    let config_error = ConfigError::ValidationError {
        location: ErrorLocation::from(Location::caller()),
        reason: String::from("bad url"),
    };

    let err = BridgeHostError::from(config_error);

    assert!(matches!(err, BridgeHostError::Core { .. }));
    assert!(err.to_string().contains("bad url"));
}

#[test]
fn given_io_error_when_converted_then_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");

    let err = BridgeHostError::from(io);

    assert!(matches!(err, BridgeHostError::Io { .. }));
    assert!(err.to_string().contains("pipe closed"));
}
