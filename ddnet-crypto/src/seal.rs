//! End-to-end sealed payloads: ECDH → HKDF-SHA256 → AES-256-GCM.
//!
//! Wire layout of a sealed blob: `iv(12) ‖ salt(16) ‖ ciphertext`.
//! The AES key is derived per message from the ECDH shared secret and the
//! random salt, so no two messages share a key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::PublicKey;
use sha2::Sha256;
use zeroize::Zeroizing;

use ddnet_types::PublicKeyBytes;

use crate::error::CryptoError;
use crate::keys::KeyPair;

/// AES-GCM IV size in bytes.
pub const IV_SIZE: usize = 12;

/// HKDF salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Derived AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Derive the per-message AES key from an ECDH shared secret and salt.
///
/// Commutative in the two identities: `derive(a, pub_b)` equals
/// `derive(b, pub_a)` for the same salt.
fn derive_key(
    keypair: &KeyPair,
    counterparty: &PublicKeyBytes,
    salt: &[u8; SALT_SIZE],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let public = PublicKey::from_sec1_bytes(counterparty.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let shared = k256::ecdh::diffie_hellman(
        keypair.secret().to_nonzero_scalar(),
        public.as_affine(),
    );

    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.raw_secret_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"ddnet:e2e:v1", key.as_mut())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Encrypt a payload for a counterparty.
///
/// Returns `iv(12) ‖ salt(16) ‖ ciphertext`.
pub fn seal(
    keypair: &KeyPair,
    counterparty: &PublicKeyBytes,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    let mut salt = [0u8; SALT_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let key = derive_key(keypair, counterparty, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::Encryption("aead encrypt failed".into()))?;

    let mut out = Vec::with_capacity(IV_SIZE + SALT_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed payload from a counterparty.
///
/// Works in either direction: ECDH gives both parties the same shared
/// secret, so the receiver derives the identical AES key from its own
/// private key and the sender's public key.
pub fn open(
    keypair: &KeyPair,
    counterparty: &PublicKeyBytes,
    blob: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < IV_SIZE + SALT_SIZE {
        return Err(CryptoError::Decryption);
    }

    let iv = &blob[..IV_SIZE];
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&blob[IV_SIZE..IV_SIZE + SALT_SIZE]);
    let ciphertext = &blob[IV_SIZE + SALT_SIZE..];

    let key = derive_key(keypair, counterparty, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
