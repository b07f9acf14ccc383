//! Error types for core encoding operations

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while handling core data types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Hex input could not be parsed
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Byte input had the wrong length
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Unknown enum discriminant on the wire or in config
    #[error("Unknown value: {0}")]
    UnknownValue(String),
}

impl From<hex::FromHexError> for CoreError {
    fn from(err: hex::FromHexError) -> Self {
        CoreError::InvalidHex(err.to_string())
    }
}
