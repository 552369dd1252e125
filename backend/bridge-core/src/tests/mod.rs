// Unit tests for crate-private behavior and pure state logic.
// End-to-end tests against a mock gateway live in integration_tests/.

mod config;
mod machine;
