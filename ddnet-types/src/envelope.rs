//! Envelope - the routing wrapper for all relayed messages.

use serde::{Deserialize, Serialize};

use crate::error::{from_cbor, to_cbor};
use crate::{ClientId, DecodeError, PublicKeyBytes};

/// The full identity of one client session: a public key plus the session's
/// client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// The client's public key.
    pub public_key: PublicKeyBytes,
    /// The session identifier.
    pub client_id: ClientId,
}

/// The addressee of an envelope.
///
/// With only a public key set, the relay fans out to every active session of
/// that identity. With a client id as well, exactly one session is targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// The target identity.
    pub public_key: PublicKeyBytes,
    /// The target session, if a specific one is meant.
    pub client_id: Option<ClientId>,
}

/// The envelope body carried over the relay.
///
/// This is the CBOR-encoded portion of the wire payload; the 64-byte
/// signature prefix and the optional end-to-end encryption of `data` are
/// applied by the codec in `ddnet-crypto`. The relay routes on `to` and
/// verifies the outer signature, but never reads `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity.
    pub from: ClientIdentity,
    /// Addressee; `None` means broadcast to every other session.
    pub to: Option<Recipient>,
    /// Opaque payload. Encrypted iff `to` carries a public key.
    pub data: Vec<u8>,
}

impl Envelope {
    /// Create a broadcast envelope (no addressee, plaintext data).
    pub fn broadcast(from: ClientIdentity, data: Vec<u8>) -> Self {
        Self {
            from,
            to: None,
            data,
        }
    }

    /// Create an envelope addressed to every session of one identity.
    pub fn to_key(from: ClientIdentity, public_key: PublicKeyBytes, data: Vec<u8>) -> Self {
        Self {
            from,
            to: Some(Recipient {
                public_key,
                client_id: None,
            }),
            data,
        }
    }

    /// Create an envelope addressed to exactly one session.
    pub fn to_session(from: ClientIdentity, to: ClientIdentity, data: Vec<u8>) -> Self {
        Self {
            from,
            to: Some(Recipient {
                public_key: to.public_key,
                client_id: Some(to.client_id),
            }),
            data,
        }
    }

    /// Serialize the body to CBOR bytes (without signature).
    pub fn body_to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        to_cbor(self)
    }

    /// Deserialize a body from CBOR bytes (without signature).
    pub fn body_from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        from_cbor(bytes)
    }
}
