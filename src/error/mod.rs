//! Error types for turnmeter.
//!
//! Only the persistence paths produce errors. Summarization itself is
//! infallible: malformed usage is coerced and serialization hazards are
//! neutralized before they can surface.

use thiserror::Error;

/// Primary error type for persistence operations.
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported rollup document version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Persistence queue closed")]
    QueueClosed,
}

impl MeterError {
    /// Whether retrying the same write later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MeterError>;
