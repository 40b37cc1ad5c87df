//! Error types for the Telegram agent bridge

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Claude Code CLI not found or not installed
    #[error("Claude Code CLI not found: {0}")]
    CliNotFound(String),

    /// Failed to spawn or wire up the agent subprocess
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Operation requires a running executor
    #[error("executor not running")]
    NotRunning,

    /// `start` called on an executor that is already running
    #[error("executor already running")]
    AlreadyRunning,

    /// Failed to write a turn to the subprocess stdin
    #[error("write to stdin: {0}")]
    Stdin(String),

    /// JSON encode/decode error on the stream protocol
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The turn was cancelled before completion
    #[error("turn cancelled: {0}")]
    Cancelled(String),

    /// Session-level failure (start, unrecoverable death)
    #[error("session error: {0}")]
    Session(String),

    /// Workspace resolution produced a path outside the base directory
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Telegram Bot API call failed
    #[error("Telegram API error: {0}")]
    Telegram(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a CLI not found error with install guidance
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::CliNotFound(
            "Claude Code not found. Install with:\n\
             npm install -g @anthropic-ai/claude-code\n\
             \n\
             Or set claude.binary in the configuration file"
                .to_string(),
        )
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a stdin write error
    pub fn stdin(msg: impl Into<String>) -> Self {
        Self::Stdin(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a workspace resolution error
    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }

    /// Create a Telegram API error
    pub fn telegram(msg: impl Into<String>) -> Self {
        Self::Telegram(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
