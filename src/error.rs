//! Error types for TideKV
//!
//! Provides a unified error type for storage, transport and protocol
//! failures. Command-level failures reported to clients live in
//! [`crate::hub::CommandError`].

use thiserror::Error;

/// Result type alias using TideError
pub type Result<T> = std::result::Result<T, TideError>;

/// Unified error type for TideKV operations
#[derive(Debug, Error)]
pub enum TideError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL record torn: {0}")]
    WalTruncated(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Snapshot corruption detected: {0}")]
    SnapshotCorruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A request the server answered with `ok:false`
    #[error("Server rejected request ({code}): {message}")]
    Remote { code: String, message: String },

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Session {0} is already registered")]
    DuplicateSession(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),
}

impl From<serde_json::Error> for TideError {
    fn from(e: serde_json::Error) -> Self {
        TideError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for TideError {
    fn from(e: bincode::Error) -> Self {
        TideError::Serialization(e.to_string())
    }
}
