//! Error handling for the persistent connection library
//!
//! Retry exhaustion and retry cancellation are not error variants: both are
//! reported as a `false` result on the retry handle. A retry loop that fails
//! to acknowledge cancellation within its grace window is logged and
//! abandoned, never surfaced to the caller.

use thiserror::Error;

/// Link error type
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// A single dial attempt was refused or timed out
    #[error("Dial failed: {0}")]
    DialFailed(String),

    /// Send attempted while no connection is active
    #[error("Not connected")]
    NotConnected,

    /// Message could not be submitted to the connection
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// IO error outside a dial attempt (bind, accept)
    #[error("IO error: {0}")]
    IoError(String),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;
