//! Kernel-specific error types.

use agora_types::error::AgoraError;
use thiserror::Error;

/// Kernel error type wrapping AgoraError with agent lifecycle context.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Agora(#[from] AgoraError),

    /// The agent could not be assembled or started.
    #[error("Boot failed: {0}")]
    BootFailed(String),

    /// A bureau already holds an agent with this address.
    #[error("Duplicate agent address: {0}")]
    DuplicateAgent(String),

    #[error("Agent already started: {0}")]
    AlreadyStarted(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
