//! Local document store collaborator.
//!
//! The sync engine does not own document storage; it consumes it behind
//! [`DocumentStore`]. The host application adapts its own database to the
//! trait and feeds change notifications into the capture bridge.
//! [`MemoryDocumentStore`] is a complete in-memory implementation used by
//! the test suite and light-weight embedders.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Well-known document type names.
pub mod doc_types {
    pub const WORKSPACE: &str = "Workspace";
    pub const REQUEST: &str = "Request";
    pub const REQUEST_GROUP: &str = "RequestGroup";
    pub const ENVIRONMENT: &str = "Environment";
    pub const COOKIE_JAR: &str = "CookieJar";
    pub const CLIENT_CERTIFICATE: &str = "ClientCertificate";
    pub const UNIT_TEST: &str = "UnitTest";
    pub const UNIT_TEST_SUITE: &str = "UnitTestSuite";
}

/// Document types that participate in sync. Everything else is ignored by
/// the capture bridge.
const SYNC_ELIGIBLE_TYPES: &[&str] = &[
    doc_types::WORKSPACE,
    doc_types::REQUEST,
    doc_types::REQUEST_GROUP,
    doc_types::ENVIRONMENT,
    doc_types::COOKIE_JAR,
    doc_types::CLIENT_CERTIFICATE,
    doc_types::UNIT_TEST,
    doc_types::UNIT_TEST_SUITE,
];

/// Whether a document type is synchronized at all.
pub fn is_sync_eligible(doc_type: &str) -> bool {
    SYNC_ELIGIBLE_TYPES.contains(&doc_type)
}

/// A document as seen by the sync engine.
///
/// The whole struct is what gets serialized and encrypted into a
/// resource's content, so a pulled document round-trips with its own
/// `modified` stamp intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub name: String,
    /// Epoch millis of the last local modification.
    pub modified: i64,
    /// Private documents never leave the device.
    #[serde(rename = "isPrivate", default)]
    pub is_private: bool,
    /// Type-specific fields, carried opaquely.
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Change feed event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Insert,
    Update,
    Remove,
}

/// The document store interface consumed by the sync engine.
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by type and id.
    fn get(&self, doc_type: &str, id: &str) -> Option<Document>;

    /// Fetch a document by id alone (ancestor walks cross types).
    fn get_any(&self, id: &str) -> Option<Document>;

    /// All documents of one type.
    fn all_by_type(&self, doc_type: &str) -> Vec<Document>;

    /// Direct children of a document, ordered by id.
    fn children_of(&self, parent_id: &str) -> Vec<Document>;

    /// Insert or update a document. Errors abort the apply of a single
    /// pulled resource, not the whole batch.
    fn upsert(&self, doc: Document) -> Result<(), String>;

    /// Remove a document if present.
    fn remove(&self, doc_type: &str, id: &str) -> Result<(), String>;
}

/// In-memory document store keyed by document id.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().expect("document store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, doc_type: &str, id: &str) -> Option<Document> {
        self.docs
            .read()
            .expect("document store lock")
            .get(id)
            .filter(|d| d.doc_type == doc_type)
            .cloned()
    }

    fn get_any(&self, id: &str) -> Option<Document> {
        self.docs
            .read()
            .expect("document store lock")
            .get(id)
            .cloned()
    }

    fn all_by_type(&self, doc_type: &str) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .expect("document store lock")
            .values()
            .filter(|d| d.doc_type == doc_type)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    fn children_of(&self, parent_id: &str) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .expect("document store lock")
            .values()
            .filter(|d| d.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    fn upsert(&self, doc: Document) -> Result<(), String> {
        self.docs
            .write()
            .expect("document store lock")
            .insert(doc.id.clone(), doc);
        Ok(())
    }

    fn remove(&self, doc_type: &str, id: &str) -> Result<(), String> {
        let mut docs = self.docs.write().expect("document store lock");
        if let Some(existing) = docs.get(id) {
            if existing.doc_type == doc_type {
                docs.remove(id);
            }
        }
        Ok(())
    }
}
