//! Change capture bridge: turns document store mutations into resource
//! store mutations.
//!
//! Change feed events are buffered in a coalescing queue and drained
//! explicitly (`write_pending_changes`), either on a timer owned by the
//! host or synchronously as a barrier before push/pull. Draining encrypts
//! each changed document with its group's symmetric key and upserts the
//! resource as dirty, so every local mutation is durably captured before
//! anything is transmitted.

use crate::crypto::{
    decrypt_aes, decrypt_rsa_with_jwk, encrypt_aes, encrypt_rsa_with_jwk,
    generate_symmetric_key_jwk, CryptoError, Envelope, SymmetricKey, SymmetricKeyJwk,
};
use crate::document::{doc_types, is_sync_eligible, ChangeEvent, Document, DocumentStore};
use crate::relay::RelayClient;
use crate::session::Session;
use crate::store::{
    ConfigPatch, Resource, ResourceGroup, ResourcePatch, StoreError, SyncStore, NO_VERSION,
};
use crate::{Result, SyncError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Shared state for the sync stack: the resource store plus the three
/// collaborators (document store, relay, session).
pub struct SyncContext {
    pub(crate) store: Mutex<SyncStore>,
    pub(crate) docs: Arc<dyn DocumentStore>,
    pub(crate) relay: Arc<dyn RelayClient>,
    pub(crate) session: Session,
}

impl SyncContext {
    pub(crate) fn new(
        store: SyncStore,
        docs: Arc<dyn DocumentStore>,
        relay: Arc<dyn RelayClient>,
        session: Session,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            docs,
            relay,
            session,
        }
    }

    /// Lock the resource store.
    pub(crate) fn store(&self) -> Result<MutexGuard<'_, SyncStore>> {
        self.store
            .lock()
            .map_err(|_| StoreError::LockPoisoned("resource store".to_string()).into())
    }
}

/// Unwrapped resource group keys, scoped to a single sync cycle.
///
/// Keys are re-derived through the session on every cycle instead of
/// living in global state; the cache only collapses repeated unwraps of
/// the same group within one push, pull, or drain.
pub struct GroupKeyCache {
    keys: HashMap<String, SymmetricKey>,
}

impl GroupKeyCache {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Unwrap the symmetric key for a group, fetching and caching the
    /// group record from the relay when it is not known locally.
    ///
    /// A group the relay no longer knows is deleted locally (resources,
    /// config, and group record) and the not-found error is propagated.
    pub async fn key_for_group(&mut self, ctx: &SyncContext, group_id: &str) -> Result<SymmetricKey> {
        if let Some(key) = self.keys.get(group_id) {
            return Ok(key.clone());
        }

        let cached = ctx.store()?.get_resource_group(group_id)?;
        let group = match cached {
            Some(group) => group,
            None => match ctx.relay.sync_get_resource_group(group_id).await {
                Ok(group) => {
                    let store = ctx.store()?;
                    store.insert_resource_group(&group)?;
                    store.create_or_update_config(group_id, &ConfigPatch::default())?;
                    group
                }
                Err(SyncError::NotFound(msg)) => {
                    ctx.store()?.remove_resource_group(group_id)?;
                    debug!("Resource group {} not found on relay; deleted locally", group_id);
                    return Err(SyncError::NotFound(msg));
                }
                Err(e) => return Err(e),
            },
        };

        let private_key = ctx.session.private_key()?;
        let jwk_json = decrypt_rsa_with_jwk(&private_key, &group.enc_symmetric_key)?;
        let jwk: SymmetricKeyJwk = serde_json::from_str(&jwk_json).map_err(|e| {
            CryptoError::InvalidKey(format!("Group key for {} was not a JWK: {}", group_id, e))
        })?;
        let key = SymmetricKey::from_jwk(&jwk)?;

        self.keys.insert(group_id.to_string(), key.clone());
        Ok(key)
    }
}

impl Default for GroupKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

struct PendingChange {
    event: ChangeEvent,
    doc: Document,
    /// Capture time, epoch millis; becomes the resource's `last_edited`.
    captured_at: i64,
}

/// The bridge between the document change feed and the resource store.
pub struct ChangeCapture {
    ctx: Arc<SyncContext>,
    pending: Mutex<Vec<(String, PendingChange)>>,
}

impl ChangeCapture {
    pub(crate) fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Buffer a change feed event.
    ///
    /// Rapid successive events for the same `(event, document)` coalesce
    /// into one pending entry at its original queue position. Private
    /// documents and non-eligible types are ignored.
    pub fn queue_change(&self, event: ChangeEvent, doc: &Document) {
        if !is_sync_eligible(&doc.doc_type) {
            return;
        }
        if doc.is_private {
            debug!("Skip private doc change {}", doc.id);
            return;
        }

        let key = format!("{:?}:{}", event, doc.id);
        let change = PendingChange {
            event,
            doc: doc.clone(),
            captured_at: chrono::Utc::now().timestamp_millis(),
        };

        let mut pending = self.pending.lock().expect("pending changes lock");
        if let Some(entry) = pending.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = change;
        } else {
            pending.push((key, change));
        }
    }

    /// Number of buffered changes.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending changes lock").len()
    }

    /// Drain the buffer in emission order, converting each change into a
    /// resource store mutation. Returns the number of changes applied.
    ///
    /// A transport failure (reaching the relay for a group record) stops
    /// the drain and puts the failed change and everything after it back
    /// at the head of the buffer, so nothing is lost and the next drain
    /// replays from the same point. Any other failure affects only that
    /// change: it is logged and dropped, and the drain continues.
    pub async fn write_pending_changes(&self, keys: &mut GroupKeyCache) -> Result<usize> {
        let changes: Vec<(String, PendingChange)> = {
            let mut pending = self.pending.lock().expect("pending changes lock");
            std::mem::take(&mut *pending)
        };

        let mut applied = 0usize;
        let mut iter = changes.into_iter();
        while let Some((key, change)) = iter.next() {
            match self.handle_change(&change, keys).await {
                Ok(()) => applied += 1,
                Err(e @ SyncError::Network(_)) => {
                    let mut requeued = vec![(key, change)];
                    requeued.extend(iter);
                    let mut pending = self.pending.lock().expect("pending changes lock");
                    // Changes queued during the drain stay behind the replay.
                    requeued.append(&mut pending);
                    *pending = requeued;
                    return Err(e);
                }
                Err(e) => {
                    warn!("Dropping unprocessable change for {}: {}", change.doc.id, e);
                }
            }
        }

        Ok(applied)
    }

    async fn handle_change(&self, change: &PendingChange, keys: &mut GroupKeyCache) -> Result<()> {
        let resource = self.get_or_create_resource_for_doc(&change.doc, keys).await?;
        let enc_content = self
            .encrypt_doc(&resource.resource_group_id, &change.doc, keys)
            .await?;

        self.ctx.store()?.update_resource(
            &resource.id,
            &ResourcePatch {
                name: Some(change.doc.name.clone()),
                last_edited: Some(change.captured_at),
                last_edited_by: Some(self.ctx.session.account_id().to_string()),
                enc_content: Some(enc_content),
                removed: Some(change.event == ChangeEvent::Remove),
                dirty: Some(true),
                ..Default::default()
            },
        )?;

        debug!("Captured {:?} {}", change.event, resource.id);
        Ok(())
    }

    /// Look up the resource for a document, creating it (and its group
    /// chain) if missing. Idempotent: a second call for the same document
    /// returns the same resource. Accidental duplicates for the same
    /// document id are deleted, keeping the first.
    pub async fn get_or_create_resource_for_doc(
        &self,
        doc: &Document,
        keys: &mut GroupKeyCache,
    ) -> Result<Resource> {
        let mut resources = {
            let store = self.ctx.store()?;
            let resources = store.find_resources_by_doc_id(&doc.id)?;
            for extra in resources.iter().skip(1) {
                store.remove_resource(&extra.id)?;
            }
            resources
        };

        if !resources.is_empty() {
            return Ok(resources.remove(0));
        }

        self.create_resource_for_doc(doc, keys).await
    }

    async fn create_resource_for_doc(
        &self,
        doc: &Document,
        keys: &mut GroupKeyCache,
    ) -> Result<Resource> {
        let workspace = self.workspace_for_doc(doc)?.ok_or_else(|| {
            // Root was deleted before its children could be synced.
            SyncError::Document(format!("Could not find workspace for doc {}", doc.id))
        })?;

        let workspace_resource = match self.ctx.store()?.get_resource_by_doc_id(&workspace.id, None)? {
            Some(resource) => resource,
            None => {
                let group = self
                    .create_resource_group(&workspace.id, &workspace.name)
                    .await?;
                self.create_resource(&workspace, &group.id, keys).await?
            }
        };

        if workspace.id == doc.id {
            Ok(workspace_resource)
        } else {
            self.create_resource(doc, &workspace_resource.resource_group_id, keys)
                .await
        }
    }

    /// Walk parent links up to the owning workspace document.
    fn workspace_for_doc(&self, doc: &Document) -> Result<Option<Document>> {
        let mut current = doc.clone();
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if current.doc_type == doc_types::WORKSPACE {
                return Ok(Some(current));
            }
            let Some(parent_id) = current.parent_id.clone() else {
                return Ok(None);
            };
            if !visited.insert(parent_id.clone()) {
                // Parent cycle; treat as rootless.
                return Ok(None);
            }
            match self.ctx.docs.get_any(&parent_id) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    async fn create_resource(
        &self,
        doc: &Document,
        resource_group_id: &str,
        keys: &mut GroupKeyCache,
    ) -> Result<Resource> {
        let enc_content = self.encrypt_doc(resource_group_id, doc, keys).await?;
        let account_id = self.ctx.session.account_id().to_string();

        let resource = Resource {
            id: doc.id.clone(),
            document_id: doc.id.clone(),
            document_type: doc.doc_type.clone(),
            resource_group_id: resource_group_id.to_string(),
            version: NO_VERSION.to_string(),
            name: doc.name.clone(),
            created_by: account_id.clone(),
            last_edited: doc.modified,
            last_edited_by: account_id,
            enc_content,
            dirty: true,
            removed: false,
        };

        self.ctx.store()?.insert_resource(&resource)?;
        Ok(resource)
    }

    /// Create a resource group for a root document: generate the group's
    /// AES key, wrap it with the account public key, and register it with
    /// the relay. A config row is created alongside with mode unset.
    pub async fn create_resource_group(&self, parent_id: &str, name: &str) -> Result<ResourceGroup> {
        let group_jwk = generate_symmetric_key_jwk();
        let group_jwk_json = serde_json::to_string(&group_jwk)
            .map_err(|e| SyncError::InvalidInput(format!("Group key JWK: {}", e)))?;
        let wrapped = encrypt_rsa_with_jwk(self.ctx.session.public_key(), &group_jwk_json)?;

        let group = self
            .ctx
            .relay
            .sync_create_resource_group(parent_id, name, &wrapped)
            .await
            .map_err(|e| {
                warn!("Failed to create resource group for {}: {}", parent_id, e);
                e
            })?;

        let store = self.ctx.store()?;
        store.insert_resource_group(&group)?;
        store.create_or_update_config(&group.id, &ConfigPatch::default())?;
        debug!("Created resource group {}", group.id);

        Ok(group)
    }

    /// Serialize and encrypt a document with its group's symmetric key.
    pub async fn encrypt_doc(
        &self,
        resource_group_id: &str,
        doc: &Document,
        keys: &mut GroupKeyCache,
    ) -> Result<String> {
        let key = keys.key_for_group(&self.ctx, resource_group_id).await?;
        let plaintext = serde_json::to_vec(doc)
            .map_err(|e| SyncError::InvalidInput(format!("Serialize doc {}: {}", doc.id, e)))?;
        let envelope = encrypt_aes(&key, &plaintext, b"")?;
        serde_json::to_string(&envelope)
            .map_err(|e| SyncError::InvalidInput(format!("Serialize envelope: {}", e)))
    }

    /// Decrypt a resource's content back into a document.
    pub async fn decrypt_doc(
        &self,
        resource_group_id: &str,
        enc_content: &str,
        keys: &mut GroupKeyCache,
    ) -> Result<Document> {
        let key = keys.key_for_group(&self.ctx, resource_group_id).await?;
        let envelope: Envelope = serde_json::from_str(enc_content).map_err(|e| {
            SyncError::Crypto(CryptoError::DecryptionFailed(format!(
                "Content was not an envelope: {}",
                e
            )))
        })?;
        let plaintext = decrypt_aes(&key, &envelope)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            SyncError::Crypto(CryptoError::DecryptionFailed(format!(
                "Decrypted content was not a document: {}",
                e
            )))
        })
    }
}
