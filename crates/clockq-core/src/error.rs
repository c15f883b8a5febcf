//! Error types for clock quantization

use thiserror::Error;

/// Clock quantization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockqError {
    /// A value was read before it was initialized
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Construction parameters cannot produce a working quantizer
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation is not allowed in the current setup
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

/// Result type for clock quantization operations
pub type ClockqResult<T> = Result<T, ClockqError>;
