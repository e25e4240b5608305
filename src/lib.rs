//! Courier Sync Core Library
//!
//! End-to-end encrypted synchronization engine: keeps locally stored
//! documents consistent across devices through a central relay that never
//! sees plaintext. Local mutations are captured from the document store's
//! change feed, encrypted per resource group, versioned, and pushed;
//! remote changes are pulled, decrypted, and applied back with
//! last-writer-wins conflict resolution.

pub mod change_capture;
pub mod conflict;
pub mod crypto;
pub mod document;
pub mod engine;
pub mod relay;
pub mod session;
pub mod store;

pub use change_capture::{ChangeCapture, GroupKeyCache};
pub use conflict::{ConflictResolver, Resolution};
pub use crypto::{
    decrypt_aes, decrypt_rsa_with_jwk, derive_account_key, encrypt_aes, encrypt_rsa_with_jwk,
    generate_key_pair_jwk, generate_symmetric_key_jwk, CryptoError, Envelope, SymmetricKey,
};
pub use document::{ChangeEvent, Document, DocumentStore, MemoryDocumentStore};
pub use engine::SyncEngine;
pub use relay::{
    HttpRelayClient, PullQuery, PullResponse, PushResponse, RelayClient, ResourceStub, VersionAck,
    WireResource,
};
pub use session::Session;
pub use store::{
    Config, ConfigPatch, Resource, ResourceGroup, ResourcePatch, StoreError, SyncMode, SyncStore,
    NO_VERSION,
};

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// General error type for sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Document store error: {0}")]
    Document(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Conflict resolution error: {0}")]
    ConflictResolution(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
