//! Protocol messages for ddnet.
//!
//! [`AuthMessage`] is exchanged directly over a fresh connection during the
//! challenge-response handshake. [`ControlMessage`] travels inside envelope
//! `data` once a session is authenticated.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::error::{from_cbor, to_cbor};
use crate::{DecodeError, DocumentId};

/// Messages of the challenge-response authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthMessage {
    /// Server → client: a fresh random challenge.
    Challenge {
        /// 32 random bytes to be signed by the client.
        challenge: [u8; 32],
    },
    /// Client → server: compact signature over the challenge.
    ChallengeResponse {
        /// 64-byte compact ECDSA signature.
        #[serde(with = "BigArray")]
        signature: [u8; 64],
    },
    /// Server → client: the handshake succeeded.
    Authenticated,
}

impl AuthMessage {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        from_cbor(bytes)
    }
}

/// Control messages carried inside envelope payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Broadcast: ask whoever holds this document to respond.
    RequestDocument {
        /// The requested document.
        document_id: DocumentId,
    },
    /// Unicast (encrypted): a full signed export of the document.
    DocumentResponse {
        /// The document this responds to.
        document_id: DocumentId,
        /// `Document::export` bytes, signed by the responder.
        export: Vec<u8>,
    },
    /// Unicast: one step of a peer-connection offer/answer negotiation.
    Signal {
        /// The document the peer link is for.
        document_id: DocumentId,
        /// Opaque transport signaling payload.
        payload: Vec<u8>,
    },
}

impl ControlMessage {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        from_cbor(bytes)
    }
}
