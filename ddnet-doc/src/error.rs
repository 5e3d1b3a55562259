//! Document and storage error types.

use ddnet_types::{DecodeError, DocumentId};
use thiserror::Error;

/// Errors from document and header operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A header or content signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The acting key is neither the owner nor an allowed client.
    #[error("unauthorized access")]
    Unauthorized,

    /// The document payload failed structural validation.
    #[error("document validation failed: {0}")]
    Validation(String),

    /// Malformed binary payload.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<ddnet_crypto::CryptoError> for DocumentError {
    fn from(err: ddnet_crypto::CryptoError) -> Self {
        match err {
            ddnet_crypto::CryptoError::InvalidSignature => Self::InvalidSignature,
            ddnet_crypto::CryptoError::Decode(e) => Self::Decode(e),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing key-value store failed.
    #[error("backing store: {0}")]
    Store(String),

    /// No prefix of the persisted snapshot and chunks loads; the document
    /// is unrecoverable.
    #[error("no recoverable prefix for document {0}")]
    Unrecoverable(DocumentId),

    /// A persisted header failed validation.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Malformed binary payload.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
