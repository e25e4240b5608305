//! Account session: identity and key material, read-only to the engine.
//!
//! The session is established by the host's login flow. It carries the
//! account's symmetric key, the RSA public key, and the RSA private key
//! encrypted with the symmetric key. The private key is decrypted on
//! demand and never cached here.

use crate::crypto::{
    decrypt_aes, CryptoError, Envelope, PrivateKeyJwk, PublicKeyJwk, SymmetricKey, SymmetricKeyJwk,
};

/// An authenticated account session.
#[derive(Debug, Clone)]
pub struct Session {
    account_id: String,
    email: String,
    first_name: String,
    last_name: String,
    /// Bearer token for the relay transport.
    token: String,
    symmetric_key: SymmetricKeyJwk,
    public_key: PublicKeyJwk,
    enc_private_key: Envelope,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: impl Into<String>,
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        token: impl Into<String>,
        symmetric_key: SymmetricKeyJwk,
        public_key: PublicKeyJwk,
        enc_private_key: Envelope,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            token: token.into(),
            symmetric_key,
            public_key,
            enc_private_key,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The account's RSA public key, used to wrap new group keys.
    pub fn public_key(&self) -> &PublicKeyJwk {
        &self.public_key
    }

    /// Decrypt the account private key with the account symmetric key.
    pub fn private_key(&self) -> Result<PrivateKeyJwk, CryptoError> {
        let key = SymmetricKey::from_jwk(&self.symmetric_key)?;
        let plaintext = decrypt_aes(&key, &self.enc_private_key)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            CryptoError::InvalidKey(format!("Encrypted private key was not a JWK: {}", e))
        })
    }
}
