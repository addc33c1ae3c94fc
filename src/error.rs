//! Error types for logos
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LogosError
pub type Result<T> = std::result::Result<T, LogosError>;

/// Unified error type for logos operations
#[derive(Debug, Error)]
pub enum LogosError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Storage device or filesystem failure. Never retried silently.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// Checksum or format mismatch in a segment, WAL file or manifest.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Caller violated a codec contract (e.g. unsorted input).
    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // API Errors
    // -------------------------------------------------------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The background worker has shut down.
    #[error("Engine is closed")]
    Closed,
}

impl LogosError {
    /// Shorthand for building a corruption error.
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        LogosError::Corruption(msg.into())
    }

    /// True for errors that mean on-disk data can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, LogosError::Corruption(_))
    }
}
