//! secp256k1 keypairs and compact ECDSA signatures.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use zeroize::Zeroizing;

use ddnet_types::{PublicKeyBytes, SignatureBytes};

use crate::error::CryptoError;

/// A secp256k1 keypair. The public key is the client's identity.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Import a keypair from 32 raw private-key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { secret })
    }

    /// Export the raw private-key bytes (zeroized when dropped).
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.secret.to_bytes());
        Zeroizing::new(out)
    }

    /// The 33-byte compressed public key for this keypair.
    pub fn public_key(&self) -> PublicKeyBytes {
        let point = self.secret.public_key().to_encoded_point(true);
        PublicKeyBytes::from_slice(point.as_bytes()).expect("compressed point is 33 bytes")
    }

    /// Sign a message, producing a 64-byte compact signature.
    ///
    /// The message is hashed with SHA-256 internally (standard ECDSA).
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        SignatureBytes::from_slice(&signature.to_bytes()).expect("compact signature is 64 bytes")
    }

    /// Borrow the inner secret key (for ECDH in `seal`).
    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

// Don't leak the private key in debug output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Verify a compact signature against a public key.
pub fn verify(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(signature.as_bytes())
        .map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
