//! Command-level errors
//!
//! Every failure a handler reports to its client. None of them closes the
//! connection.

use thiserror::Error;

use crate::error::TideError;

/// Result type for command handlers
pub type CommandResult = std::result::Result<serde_json::Value, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    /// Required field absent or of the wrong type
    #[error("invalid or missing '{0}' parameter")]
    MissingParam(&'static str),

    /// Field present but semantically invalid
    #[error("{0}")]
    InvalidFormat(String),

    /// Storage or internal failure
    #[error("server error: {0}")]
    Server(#[from] TideError),

    #[error("unrecognized command \"{0}\"")]
    UnrecognizedCommand(String),
}

impl CommandError {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::MissingParam(_) => "missing-param",
            CommandError::InvalidFormat(_) => "invalid-format",
            CommandError::Server(_) => "server-error",
            CommandError::UnrecognizedCommand(_) => "unrecognized-command",
        }
    }
}
