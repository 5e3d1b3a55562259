//! # ddnet-crypto
//!
//! Cryptographic primitives for ddnet:
//!
//! - **Identity**: secp256k1 keypairs, compact ECDSA sign/verify
//! - **Confidentiality**: ECDH → HKDF-SHA256 → AES-256-GCM sealed payloads
//! - **Envelope codec**: `signature(64) ‖ CBOR(body)` with optional
//!   end-to-end encryption of addressed payloads
//!
//! # Security Notes
//!
//! - Every sealed payload uses a fresh random 12-byte IV and 16-byte HKDF
//!   salt; the derived AES key is unique per message
//! - ECDH is commutative, so either party derives the same shared secret
//!   from its own private key and the other's public key
//! - Private key bytes are zeroized on drop and redacted in Debug output

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod keys;
mod seal;

pub use envelope::{decode, decode_verified, encode};
pub use error::CryptoError;
pub use keys::{verify, KeyPair};
pub use seal::{open, seal, IV_SIZE, KEY_SIZE, SALT_SIZE};
