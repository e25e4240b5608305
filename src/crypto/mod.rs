//! Cryptographic primitives for the sync engine.
//!
//! This module provides:
//! - PBKDF2 account key derivation (HKDF-combined salt)
//! - AES-256-GCM encryption/decryption with associated data
//! - RSA-OAEP-SHA256 key wrapping over JWK-encoded keys

pub mod cipher;
pub mod kdf;
pub mod keys;

pub use cipher::{decrypt_aes, encrypt_aes, Envelope, SymmetricKey};
pub use kdf::derive_account_key;
pub use keys::{
    decrypt_rsa_with_jwk, encrypt_rsa_with_jwk, generate_key_pair_jwk,
    generate_symmetric_key_jwk, KeyPairJwk, PrivateKeyJwk, PublicKeyJwk, SymmetricKeyJwk,
};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Key wrap failed: {0}")]
    KeyWrapFailed(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
