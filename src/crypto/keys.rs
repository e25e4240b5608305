//! JWK key encoding and RSA-OAEP key wrapping.
//!
//! Resource group symmetric keys travel as JWK JSON wrapped with the
//! account's RSA-2048 public key (OAEP, SHA-256). The account key pair is
//! itself JWK-encoded so it can be exchanged with the directory service.

use crate::crypto::cipher::SymmetricKey;
use crate::crypto::{CryptoError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const RSA_BITS: usize = 2048;
const RSA_ALG: &str = "RSA-OAEP-256";
const AES_ALG: &str = "A256GCM";

/// JWK for a 256-bit AES-GCM key (`kty: oct`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricKeyJwk {
    pub kty: String,
    pub alg: String,
    #[serde(default)]
    pub ext: bool,
    #[serde(default)]
    pub key_ops: Vec<String>,
    pub k: String,
}

impl SymmetricKeyJwk {
    /// Encode raw key bytes as a JWK.
    pub fn from_key_bytes(key: &[u8; 32]) -> Self {
        Self {
            kty: "oct".to_string(),
            alg: AES_ALG.to_string(),
            ext: true,
            key_ops: vec!["encrypt".to_string(), "decrypt".to_string()],
            k: URL_SAFE_NO_PAD.encode(key),
        }
    }
}

/// JWK for an RSA-OAEP-256 public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub alg: String,
    pub kty: String,
    #[serde(default)]
    pub key_ops: Vec<String>,
    #[serde(default)]
    pub ext: bool,
    pub e: String,
    pub n: String,
}

/// JWK for an RSA-OAEP-256 private key with full CRT components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyJwk {
    pub alg: String,
    pub kty: String,
    #[serde(default)]
    pub key_ops: Vec<String>,
    #[serde(default)]
    pub ext: bool,
    pub d: String,
    pub dp: String,
    pub dq: String,
    pub e: String,
    pub n: String,
    pub p: String,
    pub q: String,
    pub qi: String,
}

/// A freshly generated account key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairJwk {
    pub public_key: PublicKeyJwk,
    pub private_key: PrivateKeyJwk,
}

/// Generate a random AES-256-GCM key as a JWK.
pub fn generate_symmetric_key_jwk() -> SymmetricKeyJwk {
    let key = SymmetricKey::generate();
    SymmetricKeyJwk::from_key_bytes(key.as_bytes())
}

/// Generate an RSA-2048 key pair (e = 65537) as JWKs.
pub fn generate_key_pair_jwk() -> Result<KeyPairJwk> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| CryptoError::KeyWrapFailed(format!("RSA generation failed: {}", e)))?;

    let n = private.n();
    let e = private.e();
    let d = private.d();
    let primes = private.primes();
    if primes.len() != 2 {
        return Err(CryptoError::KeyWrapFailed(
            "Expected a two-prime RSA key".to_string(),
        ));
    }
    let p = &primes[0];
    let q = &primes[1];

    let one = BigUint::from(1u32);
    let dp = d % (p - &one);
    let dq = d % (q - &one);
    // p is prime, so Fermat gives the CRT coefficient q^-1 mod p.
    let qi = q.modpow(&(p - BigUint::from(2u32)), p);

    let public_key = PublicKeyJwk {
        alg: RSA_ALG.to_string(),
        kty: "RSA".to_string(),
        key_ops: vec!["encrypt".to_string()],
        ext: true,
        e: b64url_uint(e),
        n: b64url_uint(n),
    };

    let private_key = PrivateKeyJwk {
        alg: RSA_ALG.to_string(),
        kty: "RSA".to_string(),
        key_ops: vec!["decrypt".to_string()],
        ext: true,
        d: b64url_uint(d),
        dp: b64url_uint(&dp),
        dq: b64url_uint(&dq),
        e: b64url_uint(e),
        n: b64url_uint(n),
        p: b64url_uint(p),
        q: b64url_uint(q),
        qi: b64url_uint(&qi),
    };

    Ok(KeyPairJwk {
        public_key,
        private_key,
    })
}

/// Encrypt a plaintext string with an RSA public key JWK.
///
/// Returns the OAEP ciphertext as lowercase hex.
pub fn encrypt_rsa_with_jwk(public_key: &PublicKeyJwk, plaintext: &str) -> Result<String> {
    if public_key.alg != RSA_ALG {
        return Err(CryptoError::InvalidKey(
            "Public key algorithm was not RSA-OAEP-256".to_string(),
        ));
    }
    if public_key.kty != "RSA" {
        return Err(CryptoError::InvalidKey(
            "Public key type was not RSA".to_string(),
        ));
    }
    if !public_key.key_ops.iter().any(|o| o == "encrypt") {
        return Err(CryptoError::InvalidKey(
            "Public key does not have \"encrypt\" op".to_string(),
        ));
    }

    let n = uint_from_b64url(&public_key.n)?;
    let e = uint_from_b64url(&public_key.e)?;
    let key = RsaPublicKey::new(n, e)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid RSA public key: {}", e)))?;

    let mut rng = rand::thread_rng();
    let ciphertext = key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|e| CryptoError::KeyWrapFailed(format!("RSA encrypt failed: {}", e)))?;

    Ok(hex::encode(ciphertext))
}

/// Decrypt a hex OAEP ciphertext with an RSA private key JWK.
pub fn decrypt_rsa_with_jwk(private_key: &PrivateKeyJwk, encrypted_hex: &str) -> Result<String> {
    let n = uint_from_b64url(&private_key.n)?;
    let e = uint_from_b64url(&private_key.e)?;
    let d = uint_from_b64url(&private_key.d)?;
    let p = uint_from_b64url(&private_key.p)?;
    let q = uint_from_b64url(&private_key.q)?;

    let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid RSA private key: {}", e)))?;

    let ciphertext = hex::decode(encrypted_hex)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid ciphertext hex: {}", e)))?;

    let plaintext = key
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("Decrypted key was not UTF-8".to_string()))
}

fn b64url_uint(n: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(n.to_bytes_be())
}

fn uint_from_b64url(s: &str) -> Result<BigUint> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid base64url field: {}", e)))?;
    Ok(BigUint::from_bytes_be(&bytes))
}
