//! Error types for the job channel

use thiserror::Error;

/// Errors that can occur when using the job channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The transport could not reach the open state
    #[error("Connection error: {0}")]
    Connect(String),

    /// `send_job` was called while the channel was not open
    #[error("Not connected")]
    NotConnected,

    /// An inbound payload was not a valid server frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failed to serialize/deserialize a frame
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket or outbound queue error
    #[error("Transport error: {0}")]
    Transport(String),

    /// The base address cannot be turned into a job-status endpoint
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The command is missing required fields
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A pending connect was superseded by `disconnect()` or a newer `connect()`
    #[error("Connect cancelled")]
    Cancelled,
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
