//! Account key derivation.
//!
//! The account key is derived in two stages, matching the server-side
//! authentication scheme:
//! 1. HKDF-SHA256 combines the account salt and email into a 32-byte salt.
//! 2. PBKDF2-HMAC-SHA256 (100,000 iterations) stretches the passphrase
//!    with the combined salt into a 32-byte key.
//!
//! Both stages are deterministic, so the same inputs always produce the
//! same key on every device.

use crate::crypto::{CryptoError, Result};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

const OUTPUT_LENGTH: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive the 32-byte account key from a passphrase, email, and salt.
pub fn derive_account_key(passphrase: &str, email: &str, salt: &str) -> Result<[u8; 32]> {
    let combined_salt = hkdf_salt(salt, email)?;

    let mut key = [0u8; OUTPUT_LENGTH];
    pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        &combined_salt,
        PBKDF2_ITERATIONS,
        &mut key,
    );

    Ok(key)
}

/// Combine the raw account salt and email into a usable PBKDF2 salt.
fn hkdf_salt(raw_salt: &str, email: &str) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(raw_salt.as_bytes()), email.as_bytes());
    let mut okm = [0u8; OUTPUT_LENGTH];
    hkdf.expand(b"", &mut okm)
        .map_err(|e| CryptoError::KdfFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}
