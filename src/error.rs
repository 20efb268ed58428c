use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while talking to HEOS players or AVR receivers
#[derive(Error, Debug)]
pub enum BridgeError {
    /// I/O error on a socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No connection is available for the request
    #[error("Not connected")]
    NotConnected,

    /// Connection was closed while the request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// The player answered with a failure result
    #[error("Command {command} failed: {text}")]
    CommandFailed {
        /// Command that failed (`group/command`)
        command: String,
        /// HEOS error id, when reported
        eid: Option<i64>,
        /// Error text from the player
        text: String,
    },

    /// A property write was rejected before any I/O
    #[error("Invalid value: {0}")]
    Validation(String),

    /// Invalid or unexpected response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Device not known to the bridge
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
