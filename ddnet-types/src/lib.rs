//! # ddnet-types
//!
//! Wire format types for the ddnet encrypted document sync protocol.
//!
//! This crate provides the foundational types used across all ddnet crates:
//! - [`ClientId`], [`PublicKeyBytes`], [`DocumentId`], [`PeerId`] - Identity types
//! - [`Envelope`] - Signed message wrapper with routing metadata (body only;
//!   the signature and encryption live in `ddnet-crypto`)
//! - [`AuthMessage`], [`ControlMessage`] - Protocol messages
//! - [`DecodeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{ClientIdentity, Envelope, Recipient};
pub use error::DecodeError;
pub use ids::{ClientId, DocumentId, PeerId, PublicKeyBytes, SignatureBytes};
pub use messages::{AuthMessage, ControlMessage};
