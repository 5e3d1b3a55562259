//! Relay socket abstraction.

use async_trait::async_trait;
use ddnet_types::ClientIdentity;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Operation timed out.
    #[error("connection timeout")]
    Timeout,
}

/// An established, ordered, reliable duplex byte stream.
///
/// One message in equals one message out; implementations preserve message
/// boundaries and per-connection ordering.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one message over the connection.
    async fn send(&self, data: &[u8]) -> Result<(), NetError>;

    /// Receive one message from the connection.
    ///
    /// Blocks until data is available; returns [`NetError::ConnectionClosed`]
    /// once the remote side has closed and the queue is drained.
    async fn recv(&self) -> Result<Vec<u8>, NetError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), NetError>;
}

/// Client-side factory for relay connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection to the relay, asserting `identity`.
    ///
    /// The identity is carried as a connection parameter; the relay holds the
    /// socket unauthenticated until the challenge-response handshake proves
    /// possession of the corresponding private key.
    async fn dial(&self, identity: &ClientIdentity) -> Result<Box<dyn Connection>, NetError>;
}

/// A connection accepted by the relay, paired with the identity the remote
/// side asserted when dialing. The assertion is unproven until the
/// authentication handshake completes.
pub struct Incoming {
    /// The asserted (not yet verified) client identity.
    pub identity: ClientIdentity,
    /// The accepted connection.
    pub connection: Box<dyn Connection>,
}

/// Relay-side source of inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection.
    ///
    /// Returns [`NetError::ConnectionClosed`] when the listener shuts down.
    async fn accept(&self) -> Result<Incoming, NetError>;
}
