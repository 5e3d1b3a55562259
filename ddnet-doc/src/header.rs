//! Signed document headers.
//!
//! The header binds a document's identity: a fresh 16-byte id, the owner's
//! public key, the access list and a version counter, all covered by the
//! owner's signature. Export layout: `signature(64B) ‖ CBOR(body)`.

use ddnet_crypto::{verify, KeyPair};
use ddnet_types::{DecodeError, DocumentId, PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{from_cbor, to_cbor};
use crate::error::DocumentError;

const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HeaderBody {
    id: [u8; 16],
    owner: PublicKeyBytes,
    allowed_clients: Vec<PublicKeyBytes>,
    version: u32,
}

/// Signed document metadata: owner, access list, version.
///
/// Every constructor and mutator leaves the header carrying a signature that
/// verifies against `owner`; [`import`](Self::import) refuses bytes for which
/// that does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    body: HeaderBody,
    signature: SignatureBytes,
}

impl DocumentHeader {
    /// Create a fresh owner-signed header at version 1.
    pub fn create(
        keypair: &KeyPair,
        allowed_clients: Vec<PublicKeyBytes>,
    ) -> Result<Self, DocumentError> {
        let body = HeaderBody {
            id: *Uuid::new_v4().as_bytes(),
            owner: keypair.public_key(),
            allowed_clients,
            version: 1,
        };
        let signature = keypair.sign(&to_cbor(&body)?);
        Ok(Self { body, signature })
    }

    /// Serialize to `signature(64B) ‖ CBOR(body)`.
    pub fn export(&self) -> Result<Vec<u8>, DocumentError> {
        let body = to_cbor(&self.body)?;
        let mut out = Vec::with_capacity(SIGNATURE_LEN + body.len());
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse and verify an exported header.
    ///
    /// Fails with [`DocumentError::InvalidSignature`] if the signature does
    /// not verify against the embedded owner key.
    pub fn import(bytes: &[u8]) -> Result<Self, DocumentError> {
        if bytes.len() < SIGNATURE_LEN {
            return Err(DecodeError::Truncated {
                needed: SIGNATURE_LEN,
                actual: bytes.len(),
            }
            .into());
        }
        let (sig_bytes, body_bytes) = bytes.split_at(SIGNATURE_LEN);
        let signature = SignatureBytes::new(sig_bytes.try_into().expect("64 bytes"));
        let body: HeaderBody = from_cbor(body_bytes)?;

        verify(&body.owner, body_bytes, &signature)
            .map_err(|_| DocumentError::InvalidSignature)?;
        Ok(Self { body, signature })
    }

    /// Replace the access list. Owner-only: bumps `version` by one and
    /// re-signs; any other key is rejected without mutating state.
    pub fn set_allowed_clients(
        &mut self,
        allowed_clients: Vec<PublicKeyBytes>,
        keypair: &KeyPair,
    ) -> Result<(), DocumentError> {
        if keypair.public_key() != self.body.owner {
            return Err(DocumentError::Unauthorized);
        }
        let body = HeaderBody {
            id: self.body.id,
            owner: self.body.owner,
            allowed_clients,
            version: self.body.version + 1,
        };
        let signature = keypair.sign(&to_cbor(&body)?);
        self.body = body;
        self.signature = signature;
        Ok(())
    }

    /// Whether `public_key` may read and export this document.
    pub fn has_allowed_user(&self, public_key: &PublicKeyBytes) -> bool {
        self.body.owner == *public_key || self.body.allowed_clients.contains(public_key)
    }

    /// The document's address, derived from owner and id.
    pub fn address(&self) -> DocumentId {
        DocumentId::derive(&self.body.owner, &self.body.id)
    }

    /// The header's 16-byte id.
    pub fn id(&self) -> &[u8; 16] {
        &self.body.id
    }

    /// The owning public key.
    pub fn owner(&self) -> &PublicKeyBytes {
        &self.body.owner
    }

    /// The current access list (owner excluded).
    pub fn allowed_clients(&self) -> &[PublicKeyBytes] {
        &self.body.allowed_clients
    }

    /// The ACL version, starting at 1.
    pub fn version(&self) -> u32 {
        self.body.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_import_roundtrips() {
        let owner = KeyPair::generate();
        let reader = KeyPair::generate();
        let header =
            DocumentHeader::create(&owner, vec![reader.public_key()]).unwrap();

        let bytes = header.export().unwrap();
        let imported = DocumentHeader::import(&bytes).unwrap();
        assert_eq!(header, imported);
    }

    #[test]
    fn import_rejects_any_bit_flip() {
        let owner = KeyPair::generate();
        let header = DocumentHeader::create(&owner, vec![]).unwrap();
        let bytes = header.export().unwrap();

        for position in [0, 30, 63, 64, 70, bytes.len() - 1] {
            let mut tampered = bytes.clone();
            tampered[position] ^= 0x01;
            assert!(
                DocumentHeader::import(&tampered).is_err(),
                "flip at {position} must fail import"
            );
        }
    }

    #[test]
    fn import_rejects_truncated_input() {
        let result = DocumentHeader::import(&[0u8; 20]);
        assert!(matches!(
            result,
            Err(DocumentError::Decode(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn fresh_header_starts_at_version_one() {
        let owner = KeyPair::generate();
        let header = DocumentHeader::create(&owner, vec![]).unwrap();
        assert_eq!(header.version(), 1);
    }

    #[test]
    fn owner_can_update_allowed_clients() {
        let owner = KeyPair::generate();
        let reader = KeyPair::generate();
        let mut header = DocumentHeader::create(&owner, vec![]).unwrap();

        header
            .set_allowed_clients(vec![reader.public_key()], &owner)
            .unwrap();

        assert_eq!(header.version(), 2);
        assert!(header.has_allowed_user(&reader.public_key()));

        // The re-signed header still imports cleanly
        let bytes = header.export().unwrap();
        DocumentHeader::import(&bytes).unwrap();
    }

    #[test]
    fn non_owner_update_is_rejected_without_mutation() {
        let owner = KeyPair::generate();
        let intruder = KeyPair::generate();
        let mut header = DocumentHeader::create(&owner, vec![]).unwrap();

        let result = header.set_allowed_clients(vec![intruder.public_key()], &intruder);
        assert!(matches!(result, Err(DocumentError::Unauthorized)));
        assert_eq!(header.version(), 1);
        assert!(!header.has_allowed_user(&intruder.public_key()));
    }

    #[test]
    fn version_increases_by_one_per_update() {
        let owner = KeyPair::generate();
        let mut header = DocumentHeader::create(&owner, vec![]).unwrap();

        for expected in 2..=5 {
            header.set_allowed_clients(vec![], &owner).unwrap();
            assert_eq!(header.version(), expected);
        }
    }

    #[test]
    fn owner_is_always_an_allowed_user() {
        let owner = KeyPair::generate();
        let header = DocumentHeader::create(&owner, vec![]).unwrap();
        assert!(header.has_allowed_user(&owner.public_key()));

        let stranger = KeyPair::generate();
        assert!(!header.has_allowed_user(&stranger.public_key()));
    }

    #[test]
    fn address_is_stable_across_export() {
        let owner = KeyPair::generate();
        let header = DocumentHeader::create(&owner, vec![]).unwrap();
        let imported = DocumentHeader::import(&header.export().unwrap()).unwrap();
        assert_eq!(header.address(), imported.address());
    }

    #[test]
    fn distinct_documents_get_distinct_addresses() {
        let owner = KeyPair::generate();
        let a = DocumentHeader::create(&owner, vec![]).unwrap();
        let b = DocumentHeader::create(&owner, vec![]).unwrap();
        assert_ne!(a.address(), b.address());
    }
}
