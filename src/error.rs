//! Error types for birdtrip

use thiserror::Error;

use crate::ebird::client::ObservationError;
use crate::llm::client::LlmError;

/// Main error type for birdtrip
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input violates a documented constraint.
    /// Never retried; surfaced to the caller as a typed failure.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport or protocol failure against the observation service
    #[error("Observation service error: {0}")]
    Observation(#[from] ObservationError),

    /// Transport or validation failure against the language model.
    /// Always non-fatal; the affected stage falls back.
    #[error("Language model error: {0}")]
    LanguageModel(#[from] LlmError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for birdtrip operations
pub type Result<T> = std::result::Result<T, Error>;
