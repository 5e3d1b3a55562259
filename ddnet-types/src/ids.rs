//! Identity types for ddnet.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;

/// A unique identifier for one client session (tab/process).
///
/// 16 bytes (UUID v4). One identity (public key) may run several
/// simultaneous sessions, each with its own `ClientId`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId([u8; 16]);

impl ClientId {
    /// Create a new random ClientId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Create a ClientId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 16 {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this ClientId.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", &self.to_string()[..8])
    }
}

/// A 33-byte compressed secp256k1 public key.
///
/// This is the sole client identity on the wire. Key generation and
/// signature verification live in `ddnet-crypto`; this type only carries
/// the bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde(with = "BigArray")] [u8; 33]);

impl PublicKeyBytes {
    /// Wrap raw compressed SEC1 bytes.
    pub fn new(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    /// Create a PublicKeyBytes from a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 33 {
            let mut arr = [0u8; 33];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this public key.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", &self.to_string()[..8])
    }
}

/// A 64-byte compact ECDSA signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde(with = "BigArray")] [u8; 64]);

impl SignatureBytes {
    /// Wrap raw compact signature bytes.
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Create a SignatureBytes from a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 64 {
            let mut arr = [0u8; 64];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this signature.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl PartialEq for SignatureBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for SignatureBytes {}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", hex::encode(&self.0[..4]))
    }
}

/// A unique identifier for a shared document.
///
/// Derived deterministically from the owner's public key and the header's
/// 16-byte id, so identical inputs always name the same document. Displayed
/// as a base58 string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId([u8; 32]);

impl DocumentId {
    /// Derive the document address from its owner and header id.
    ///
    /// `address = SHA-256("ddnet:address:v1" || owner || id)`. Pure
    /// function: identical inputs produce identical output.
    pub fn derive(owner: &PublicKeyBytes, id: &[u8; 16]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"ddnet:address:v1");
        hasher.update(owner.as_bytes());
        hasher.update(id);
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Create a random DocumentId (for testing).
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a DocumentId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Parse a DocumentId from its base58 string form.
    pub fn from_base58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw bytes of this DocumentId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", &self.to_string()[..8])
    }
}

/// A deterministic identifier for a (document, counterparty) peer link.
///
/// Both sides of a negotiation derive the same id from the document and the
/// *counterparty's* identity, so repeated negotiation attempts converge on
/// one peer object per side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Derive the peer id for a document and counterparty identity.
    pub fn derive(document: &DocumentId, public_key: &PublicKeyBytes, client_id: &ClientId) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"ddnet:peer:v1");
        hasher.update(document.as_bytes());
        hasher.update(public_key.as_bytes());
        hasher.update(client_id.as_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Get the raw bytes of this PeerId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &hex::encode(self.0)[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(fill: u8) -> PublicKeyBytes {
        PublicKeyBytes::new([fill; 33])
    }

    #[test]
    fn client_id_roundtrip() {
        let original = ClientId::random();
        let restored = ClientId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn client_id_from_invalid_length_fails() {
        assert!(ClientId::from_bytes(&[0u8; 8]).is_none());
        assert!(ClientId::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(ClientId::random(), ClientId::random());
    }

    #[test]
    fn public_key_from_slice_checks_length() {
        assert!(PublicKeyBytes::from_slice(&[2u8; 33]).is_some());
        assert!(PublicKeyBytes::from_slice(&[2u8; 32]).is_none());
        assert!(PublicKeyBytes::from_slice(&[2u8; 65]).is_none());
    }

    #[test]
    fn document_id_derivation_is_deterministic() {
        let owner = test_key(2);
        let id = [7u8; 16];
        assert_eq!(DocumentId::derive(&owner, &id), DocumentId::derive(&owner, &id));
    }

    #[test]
    fn document_id_changes_with_either_input() {
        let owner_a = test_key(2);
        let owner_b = test_key(3);
        let id_a = [7u8; 16];
        let id_b = [8u8; 16];

        let base = DocumentId::derive(&owner_a, &id_a);
        assert_ne!(base, DocumentId::derive(&owner_b, &id_a));
        assert_ne!(base, DocumentId::derive(&owner_a, &id_b));
    }

    #[test]
    fn document_id_base58_roundtrip() {
        let id = DocumentId::random();
        let encoded = id.to_string();
        let decoded = DocumentId::from_base58(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn document_id_rejects_bad_base58() {
        assert!(DocumentId::from_base58("not-base58-0OIl").is_none());
        // Valid base58 but wrong length
        assert!(DocumentId::from_base58("3mJr7A").is_none());
    }

    #[test]
    fn peer_id_is_deterministic() {
        let doc = DocumentId::random();
        let key = test_key(2);
        let client = ClientId::random();

        let a = PeerId::derive(&doc, &key, &client);
        let b = PeerId::derive(&doc, &key, &client);
        assert_eq!(a, b);
    }

    #[test]
    fn peer_id_differs_per_document_and_counterparty() {
        let doc_a = DocumentId::random();
        let doc_b = DocumentId::random();
        let key = test_key(2);
        let client = ClientId::random();

        let base = PeerId::derive(&doc_a, &key, &client);
        assert_ne!(base, PeerId::derive(&doc_b, &key, &client));
        assert_ne!(base, PeerId::derive(&doc_a, &test_key(3), &client));
        assert_ne!(base, PeerId::derive(&doc_a, &key, &ClientId::random()));
    }

    #[test]
    fn signature_bytes_equality_compares_contents() {
        let a = SignatureBytes::new([1u8; 64]);
        let b = SignatureBytes::new([1u8; 64]);
        let c = SignatureBytes::new([2u8; 64]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
