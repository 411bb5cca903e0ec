//! Error types for redialer

use thiserror::Error;

/// Errors that can occur while dialing or tearing down connections
#[derive(Debug, Error)]
pub enum RedialError {
    /// A single connection attempt failed
    #[error("Failed to dial '{addr}': {reason}")]
    Dial {
        addr: String,
        reason: String,
    },

    /// Tearing down a tracked connection failed
    #[error("Close error: {0}")]
    Close(String),

    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for redialer operations
pub type Result<T> = std::result::Result<T, RedialError>;
