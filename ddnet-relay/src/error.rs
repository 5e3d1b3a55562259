//! Error types for ddnet-relay.

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The listener shut down; no further connections will arrive.
    #[error("listener closed")]
    ListenerClosed,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Per-connection protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The client did not complete the handshake in time.
    #[error("authentication timed out after {seconds}s")]
    AuthTimeout {
        /// The configured timeout.
        seconds: u64,
    },

    /// The handshake failed.
    #[error("authentication failed: {reason}")]
    AuthFailed {
        /// What went wrong.
        reason: String,
    },

    /// A message could not be decoded.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What went wrong.
        reason: String,
    },

    /// The underlying transport failed.
    #[error("transport: {0}")]
    Transport(#[from] ddnet_net::NetError),
}
