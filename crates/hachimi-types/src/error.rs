//! Error types for the hachimi engagement system.

use thiserror::Error;

/// Unified error type for domain operations.
#[derive(Debug, Error)]
pub enum HachimiError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
