//! AES-256-GCM encryption and decryption of document content.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) nonce, freshly random per call
//! - 128-bit authentication tag
//! - optional associated data, authenticated but not encrypted
//!
//! The output is a structured [`Envelope`] with hex-encoded fields rather
//! than raw bytes, so the associated data travels with the ciphertext and
//! is verified on decrypt.

use crate::crypto::keys::SymmetricKeyJwk;
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A 256-bit symmetric key.
///
/// Wiped from memory on drop. Resource group keys are only unwrapped on
/// demand and held for the duration of one sync cycle.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; 32],
}

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Decode a key from its JWK representation.
    pub fn from_jwk(jwk: &SymmetricKeyJwk) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&jwk.k)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid JWK k field: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Symmetric key must be 32 bytes".to_string()))?;
        Ok(Self { key })
    }

    /// Get the raw key bytes (use sparingly).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// An encrypted message envelope.
///
/// All fields are lowercase hex: `iv` is the 12-byte nonce, `d` the
/// ciphertext, `t` the 16-byte authentication tag, and `ad` the associated
/// data that was authenticated alongside the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub d: String,
    pub t: String,
    pub ad: String,
}

/// Encrypt data using AES-256-GCM.
///
/// Each call uses a cryptographically random nonce; encrypting the same
/// plaintext twice never yields the same envelope.
pub fn encrypt_aes(key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> Result<Envelope> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot encrypt empty data".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

    let ciphertext_with_tag = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    if ciphertext_with_tag.len() < TAG_LEN {
        return Err(CryptoError::EncryptionFailed(
            "Ciphertext too short - missing auth tag".to_string(),
        ));
    }

    // aes-gcm appends the tag to the ciphertext; split it back out so the
    // envelope carries it as its own field.
    let tag_start = ciphertext_with_tag.len() - TAG_LEN;

    Ok(Envelope {
        iv: hex::encode(nonce_bytes),
        d: hex::encode(&ciphertext_with_tag[..tag_start]),
        t: hex::encode(&ciphertext_with_tag[tag_start..]),
        ad: hex::encode(associated_data),
    })
}

/// Decrypt an [`Envelope`] using AES-256-GCM.
///
/// Fails with [`CryptoError::AuthenticationFailed`] when the tag does not
/// verify (wrong key, tampered ciphertext, or tampered associated data).
/// Corrupted data is never returned.
pub fn decrypt_aes(key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>> {
    let iv = hex::decode(&envelope.iv)
        .map_err(|e| CryptoError::InvalidNonce(format!("Invalid iv hex: {}", e)))?;
    let nonce_bytes: [u8; NONCE_LEN] = iv
        .try_into()
        .map_err(|_| CryptoError::InvalidNonce("Nonce must be 12 bytes".to_string()))?;

    let ciphertext = hex::decode(&envelope.d)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid ciphertext hex: {}", e)))?;
    let tag = hex::decode(&envelope.t)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid tag hex: {}", e)))?;
    let associated_data = hex::decode(&envelope.ad)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid ad hex: {}", e)))?;

    if tag.len() != TAG_LEN {
        return Err(CryptoError::DecryptionFailed(
            "Auth tag must be 16 bytes".to_string(),
        ));
    }

    let mut ciphertext_with_tag = ciphertext;
    ciphertext_with_tag.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(nonce_bytes);

    cipher
        .decrypt(
            &nonce,
            Payload {
                msg: ciphertext_with_tag.as_slice(),
                aad: &associated_data,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}
