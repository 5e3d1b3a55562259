//! Error types for ddnet-crypto.

use thiserror::Error;

/// Errors raised by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A signature did not verify against the claimed public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// A key could not be parsed or used.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// AEAD encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// AEAD decryption failed (authentication error or truncated blob).
    #[error("decryption failed: authentication error")]
    Decryption,

    /// The envelope body could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Decode(#[from] ddnet_types::DecodeError),
}
