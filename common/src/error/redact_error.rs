use crate::ErrorLocation;

use thiserror::Error as ThisError;

/// A secret wrapper was asked to leave the process through serde.
#[derive(Debug, ThisError)]
pub enum RedactError {
    #[error("Redaction Error: {type_name} cannot be serialized, use expose() explicitly {location}")]
    Serialization {
        type_name: &'static str,
        location: ErrorLocation,
    },
}

impl RedactError {
    #[track_caller]
    pub fn serialization(type_name: &'static str) -> Self {
        RedactError::Serialization {
            type_name,
            location: ErrorLocation::caller(),
        }
    }
}
