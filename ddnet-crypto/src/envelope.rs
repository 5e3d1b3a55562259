//! Signed envelope codec.
//!
//! Wire layout: `signature(64) ‖ CBOR(body)`. The signature is computed by
//! the sender over the serialized body. If the envelope is addressed
//! (`to.public_key` present), `data` is sealed for the recipient before the
//! body is serialized; broadcast envelopes stay plaintext.

use ddnet_types::{Envelope, SignatureBytes};

use crate::error::CryptoError;
use crate::keys::{verify, KeyPair};
use crate::seal::{open, seal};

/// Signature prefix length on the wire.
const SIGNATURE_LEN: usize = 64;

/// Encode and sign an envelope for transmission.
///
/// Addressed payloads are sealed for `to.public_key`; the broadcast path
/// leaves `data` as-is (broadcast cannot be encrypted; there is no single
/// recipient key).
pub fn encode(envelope: &Envelope, keypair: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    let body = match &envelope.to {
        Some(recipient) => {
            let sealed = seal(keypair, &recipient.public_key, &envelope.data)?;
            Envelope {
                from: envelope.from,
                to: envelope.to,
                data: sealed,
            }
        }
        None => envelope.clone(),
    };

    let body_bytes = body.body_to_bytes()?;
    let signature = keypair.sign(&body_bytes);

    let mut out = Vec::with_capacity(SIGNATURE_LEN + body_bytes.len());
    out.extend_from_slice(signature.as_bytes());
    out.extend_from_slice(&body_bytes);
    Ok(out)
}

/// Decode an envelope and verify its signature, without decrypting.
///
/// This is the relay's view: routing metadata is authenticated, the payload
/// stays opaque.
pub fn decode_verified(bytes: &[u8]) -> Result<Envelope, CryptoError> {
    if bytes.len() < SIGNATURE_LEN {
        return Err(CryptoError::Decode(ddnet_types::DecodeError::Truncated {
            needed: SIGNATURE_LEN,
            actual: bytes.len(),
        }));
    }

    let signature =
        SignatureBytes::from_slice(&bytes[..SIGNATURE_LEN]).expect("slice is 64 bytes");
    let body_bytes = &bytes[SIGNATURE_LEN..];
    let envelope = Envelope::body_from_bytes(body_bytes)?;

    verify(&envelope.from.public_key, body_bytes, &signature)?;
    Ok(envelope)
}

/// Decode, verify, and (when addressed to us) decrypt an envelope.
///
/// If `to.public_key` equals our identity the payload is opened with
/// ECDH(our private key, sender's public key). Envelopes addressed to a
/// different key are returned with their payload still sealed; broadcast
/// payloads are plaintext already.
pub fn decode(bytes: &[u8], keypair: &KeyPair) -> Result<Envelope, CryptoError> {
    let mut envelope = decode_verified(bytes)?;

    if let Some(recipient) = &envelope.to {
        if recipient.public_key == keypair.public_key() {
            envelope.data = open(keypair, &envelope.from.public_key, &envelope.data)?;
        }
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_types::{ClientId, ClientIdentity};

    fn identity(keypair: &KeyPair) -> ClientIdentity {
        ClientIdentity {
            public_key: keypair.public_key(),
            client_id: ClientId::random(),
        }
    }

    #[test]
    fn addressed_envelope_roundtrip() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), b"hello bob".to_vec());
        let wire = encode(&envelope, &alice).unwrap();
        let decoded = decode(&wire, &bob).unwrap();

        assert_eq!(decoded.from, envelope.from);
        assert_eq!(decoded.to, envelope.to);
        assert_eq!(decoded.data, b"hello bob");
    }

    #[test]
    fn broadcast_envelope_stays_plaintext() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let envelope = Envelope::broadcast(identity(&alice), b"to everyone".to_vec());
        let wire = encode(&envelope, &alice).unwrap();

        // The wire body contains the payload verbatim (no encryption)
        let decoded = decode(&wire, &bob).unwrap();
        assert_eq!(decoded.data, b"to everyone");
    }

    #[test]
    fn addressed_payload_is_not_plaintext_on_the_wire() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let secret = b"very secret content here";
        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), secret.to_vec());
        let wire = encode(&envelope, &alice).unwrap();

        assert!(!wire
            .windows(secret.len())
            .any(|window| window == secret.as_slice()));
    }

    #[test]
    fn relay_view_verifies_without_decrypting() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), b"sealed".to_vec());
        let wire = encode(&envelope, &alice).unwrap();

        let routed = decode_verified(&wire).unwrap();
        assert_eq!(routed.from, envelope.from);
        // Payload is still the sealed blob, not the plaintext
        assert_ne!(routed.data, b"sealed");
    }

    #[test]
    fn any_bit_flip_breaks_verification() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), vec![1, 2, 3]);
        let wire = encode(&envelope, &alice).unwrap();

        // Sample positions across signature and body
        for position in [0, 17, 63, 64, 80, wire.len() - 1] {
            let mut tampered = wire.clone();
            tampered[position] ^= 0x01;
            assert!(
                decode(&tampered, &bob).is_err(),
                "bit flip at byte {} must fail verification",
                position
            );
        }
    }

    #[test]
    fn truncated_wire_fails() {
        let alice = KeyPair::generate();
        let result = decode(&[0u8; 32], &alice);
        assert!(matches!(result, Err(CryptoError::Decode(_))));
    }

    #[test]
    fn envelope_for_someone_else_stays_sealed() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();

        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), b"for bob".to_vec());
        let wire = encode(&envelope, &alice).unwrap();

        // Carol can verify routing but sees only ciphertext
        let decoded = decode(&wire, &carol).unwrap();
        assert_ne!(decoded.data, b"for bob");
    }

    #[test]
    fn signature_covers_sealed_body() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let envelope = Envelope::to_key(identity(&alice), bob.public_key(), b"payload".to_vec());
        let wire = encode(&envelope, &alice).unwrap();

        // Swapping in a different (valid) signature must fail
        let other_sig = alice.sign(b"unrelated");
        let mut forged = wire.clone();
        forged[..64].copy_from_slice(other_sig.as_bytes());
        assert!(decode(&forged, &bob).is_err());
    }
}
