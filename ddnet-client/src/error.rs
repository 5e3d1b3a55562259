//! Client error taxonomy.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the client crate.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport failure.
    #[error(transparent)]
    Net(#[from] ddnet_net::NetError),

    /// Signing, verification or sealing failure.
    #[error(transparent)]
    Crypto(#[from] ddnet_crypto::CryptoError),

    /// Document validation or authorization failure.
    #[error(transparent)]
    Document(#[from] ddnet_doc::DocumentError),

    /// Persistence failure.
    #[error(transparent)]
    Storage(#[from] ddnet_doc::StorageError),

    /// Malformed wire bytes.
    #[error(transparent)]
    Decode(#[from] ddnet_types::DecodeError),

    /// The relay did not complete the handshake in time.
    #[error("authentication timed out after {seconds}s")]
    AuthTimeout {
        /// The configured handshake timeout.
        seconds: u64,
    },

    /// The handshake was refused.
    #[error("authentication failed: {reason}")]
    AuthFailed {
        /// What went wrong.
        reason: String,
    },

    /// The relay link could not be (re)established.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// What went wrong.
        reason: String,
    },

    /// No relay link is currently up.
    #[error("not connected to a relay")]
    NotConnected,

    /// Nobody answered a document request in time.
    #[error("no response for document {document} within {seconds}s")]
    RequestTimeout {
        /// The requested document address.
        document: ddnet_types::DocumentId,
        /// The configured request timeout.
        seconds: u64,
    },

    /// The addressed document is not open.
    #[error("unknown document {document}")]
    UnknownDocument {
        /// The document that was addressed.
        document: ddnet_types::DocumentId,
    },

    /// The addressed peer is not tracked.
    #[error("unknown peer {peer}")]
    UnknownPeer {
        /// The peer that was addressed.
        peer: ddnet_types::PeerId,
    },
}
