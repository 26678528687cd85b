use thiserror::Error;

use natter_types::error::TypesError;

/// Errors that can occur in the relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A general network-level error.
    #[error("network error: {reason}")]
    NetworkError { reason: String },

    /// Failed to encode or decode a frame.
    #[error("codec error: {reason}")]
    CodecError { reason: String },

    /// Failed to establish or maintain a connection.
    #[error("connection error: {reason}")]
    ConnectionError { reason: String },

    /// Frame exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A frame was decoded but its contents are invalid.
    #[error("protocol error: {reason}")]
    ProtocolError { reason: String },

    /// A listener failed while handling an event.
    #[error("dispatch error: {reason}")]
    DispatchError { reason: String },

    /// Reference to a peer the directory does not hold, or a duplicate entry.
    #[error("directory error: {reason}")]
    DirectoryError { reason: String },

    /// Channel send/receive error.
    #[error("channel error: {reason}")]
    ChannelError { reason: String },

    /// Peer is running an incompatible protocol version.
    #[error("protocol version mismatch: peer sent v{peer}, we run v{ours}")]
    VersionMismatch { peer: u8, ours: u8 },

    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TypesError),

    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// No tokio runtime to run the node on.
    #[error("runtime error: {reason}")]
    Runtime { reason: String },

    #[error("node already started")]
    AlreadyStarted,

    #[error("node is not running")]
    NotRunning,
}
