//! Shared error types for the Agora system.

use thiserror::Error;

/// Top-level error type for the Agora system.
#[derive(Error, Debug)]
pub enum AgoraError {
    /// Key material or address could not be parsed or derived.
    #[error("Identity error: {0}")]
    Identity(String),

    /// An envelope was structurally invalid.
    #[error("Envelope error: {0}")]
    Envelope(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A registry or name-service lookup failed.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(String),

    /// The key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dialogue specification was malformed.
    #[error("Dialogue error: {0}")]
    Dialogue(String),

    /// A protocol definition was malformed or conflicting.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The agent is shutting down.
    #[error("Shutdown in progress")]
    ShuttingDown,

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AgoraError {
    fn from(e: serde_json::Error) -> Self {
        AgoraError::Serialization(e.to_string())
    }
}

/// Alias for Result with AgoraError.
pub type AgoraResult<T> = Result<T, AgoraError>;
