//! Sync engine: orchestrates push/pull/resolve/apply cycles per resource
//! group.
//!
//! Each group is serialized behind its own async lock so push and pull
//! never interleave for the same group, while unrelated groups proceed
//! concurrently. Locks are never held across relay calls: the engine
//! snapshots under the lock, releases it for the network round-trip, and
//! re-acquires it to apply the response. Responses are applied only after
//! they are fully received, so an abandoned cycle leaves no partial
//! version bumps.

use crate::change_capture::{ChangeCapture, GroupKeyCache, SyncContext};
use crate::conflict::{ConflictResolver, Resolution};
use crate::document::{doc_types, is_sync_eligible, ChangeEvent, Document, DocumentStore};
use crate::relay::{PullQuery, PushResponse, RelayClient, ResourceStub, WireResource};
use crate::session::Session;
use crate::store::{Config, ConfigPatch, Resource, ResourcePatch, SyncStore, NO_VERSION};
use crate::{Result, SyncError};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// The synchronization engine.
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    capture: ChangeCapture,
    group_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncEngine {
    /// Build an engine over the resource store and its collaborators.
    pub fn new(
        store: SyncStore,
        docs: Arc<dyn DocumentStore>,
        relay: Arc<dyn RelayClient>,
        session: Session,
    ) -> Self {
        let ctx = Arc::new(SyncContext::new(store, docs, relay, session));
        Self {
            capture: ChangeCapture::new(ctx.clone()),
            ctx,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The change capture bridge, for hosts that need direct access.
    pub fn capture(&self) -> &ChangeCapture {
        &self.capture
    }

    /// Direct access to the resource store, e.g. for reading sync state
    /// or adjusting group configs.
    pub fn store(&self) -> Result<std::sync::MutexGuard<'_, SyncStore>> {
        self.ctx.store()
    }

    /// Buffer a document store change feed event.
    pub fn queue_change(&self, event: ChangeEvent, doc: &Document) {
        self.capture.queue_change(event, doc);
    }

    /// Drain buffered changes into the resource store. Returns how many
    /// changes were applied.
    pub async fn write_pending_changes(&self) -> Result<usize> {
        let mut keys = GroupKeyCache::new();
        self.capture.write_pending_changes(&mut keys).await
    }

    /// One full cycle: push local changes, then pull remote ones.
    pub async fn sync(&self) -> Result<()> {
        self.push(None).await?;
        self.pull(None).await?;
        Ok(())
    }

    /// First run on a device: land remote state, bootstrap resources for
    /// existing documents, then converge.
    pub async fn initial_sync(&self) -> Result<()> {
        // Pull before bootstrapping so documents the relay already has are
        // not recreated as fresh local resources.
        self.pull(None).await?;
        self.init().await?;
        self.push(None).await?;
        self.pull(None).await?;
        Ok(())
    }

    /// Bootstrap: ensure a config exists for every known group and a
    /// resource exists for every eligible local document.
    ///
    /// Documents are visited breadth-first from each workspace root,
    /// parents before children, so group chains are created exactly once
    /// in a deterministic order.
    pub async fn init(&self) -> Result<()> {
        let mut keys = GroupKeyCache::new();

        let group_ids: BTreeSet<String> = self
            .ctx
            .store()?
            .all_resources()?
            .into_iter()
            .map(|r| r.resource_group_id)
            .collect();
        {
            let store = self.ctx.store()?;
            for group_id in &group_ids {
                store.create_or_update_config(group_id, &ConfigPatch::default())?;
            }
        }

        let mut created = 0usize;
        for workspace in self.ctx.docs.all_by_type(doc_types::WORKSPACE) {
            let mut queue: VecDeque<Document> = VecDeque::from([workspace]);
            while let Some(doc) = queue.pop_front() {
                for child in self.ctx.docs.children_of(&doc.id) {
                    queue.push_back(child);
                }

                if !is_sync_eligible(&doc.doc_type) || doc.is_private {
                    continue;
                }
                if self.ctx.store()?.get_resource_by_doc_id(&doc.id, None)?.is_some() {
                    continue;
                }
                match self.capture.get_or_create_resource_for_doc(&doc, &mut keys).await {
                    Ok(_) => created += 1,
                    Err(e) => warn!("Failed to create resource for {}: {}", doc.id, e),
                }
            }
        }

        if created > 0 {
            debug!("Created {} resources during init", created);
        }
        Ok(())
    }

    /// Push dirty resources to the relay.
    ///
    /// With a group id the push is forced regardless of its configured
    /// mode; otherwise every group whose config mode is `on` is pushed.
    pub async fn push(&self, resource_group_id: Option<&str>) -> Result<()> {
        let mut keys = GroupKeyCache::new();
        // Barrier: push must observe a consistent dirty set.
        self.capture.write_pending_changes(&mut keys).await?;

        let targets: Vec<String> = match resource_group_id {
            Some(group_id) => vec![group_id.to_string()],
            None => self
                .ctx
                .store()?
                .find_active_configs()?
                .into_iter()
                .map(|c| c.resource_group_id)
                .collect(),
        };

        for group_id in targets {
            self.push_group(&group_id, &mut keys).await?;
        }
        Ok(())
    }

    async fn push_group(&self, group_id: &str, keys: &mut GroupKeyCache) -> Result<()> {
        let lock = self.group_lock(group_id);
        let guard = lock.lock().await;

        let to_push: Vec<Resource> = {
            let store = self.ctx.store()?;
            let config = store
                .get_config(group_id)?
                .unwrap_or_else(|| Config::new_unset(group_id));

            let mut batch: Vec<Resource> = store
                .find_dirty_resources(Some(group_id))?
                .into_iter()
                .filter(|r| {
                    if excluded_by_config(&config, &r.document_type) {
                        debug!("Skipping excluded {} {}", r.document_type, r.id);
                        return false;
                    }
                    true
                })
                .collect();

            if let Some(group) = store.get_resource_group(group_id)? {
                // The relay reconstructs hierarchy from the root down, so
                // an unacknowledged root joins the batch even when clean.
                if !batch.iter().any(|r| r.document_id == group.parent_resource_id) {
                    if let Some(root) =
                        store.get_resource_by_doc_id(&group.parent_resource_id, Some(group_id))?
                    {
                        if root.version == NO_VERSION {
                            batch.push(root);
                        }
                    }
                }
                let root_doc_id = group.parent_resource_id;
                batch.sort_by_key(|r| r.document_id != root_doc_id);
            }
            batch
        };

        if to_push.is_empty() {
            return Ok(());
        }

        let wire: Vec<WireResource> = to_push.iter().map(WireResource::from).collect();
        drop(guard);

        // Network failures propagate with no local state touched.
        let response = self.ctx.relay.sync_push(wire).await?;

        if !response.conflicts.is_empty() {
            // Unwrap the group key before re-taking the lock.
            keys.key_for_group(&self.ctx, group_id).await?;
        }

        let _guard = lock.lock().await;
        self.apply_push_response(response, keys).await
    }

    async fn apply_push_response(
        &self,
        response: PushResponse,
        keys: &mut GroupKeyCache,
    ) -> Result<()> {
        {
            let store = self.ctx.store()?;
            for (acks, label) in [
                (&response.created, "created"),
                (&response.updated, "updated"),
                (&response.removed, "removed"),
            ] {
                for ack in acks {
                    if store.get_resource(&ack.id)?.is_none() {
                        warn!("Push ack for unknown resource {}", ack.id);
                        continue;
                    }
                    store.update_resource(
                        &ack.id,
                        &ResourcePatch {
                            version: Some(ack.version.clone()),
                            dirty: Some(false),
                            ..Default::default()
                        },
                    )?;
                }
                if !acks.is_empty() {
                    debug!("Push {} {} resources", label, acks.len());
                }
            }
        }

        for server in &response.conflicts {
            self.resolve_conflict(server, keys).await?;
        }
        Ok(())
    }

    async fn resolve_conflict(&self, server: &WireResource, keys: &mut GroupKeyCache) -> Result<()> {
        let Some(local) = self.ctx.store()?.get_resource(&server.id)? else {
            warn!("Conflict for unknown resource {}", server.id);
            return Ok(());
        };

        let resolution = if server.last_edited <= 0 {
            warn!(
                "Conflict record for {} has no edit stamp; preferring remote",
                server.id
            );
            Resolution::AcceptRemote
        } else {
            ConflictResolver::resolve(local.last_edited, server.last_edited)
        };

        match resolution {
            Resolution::KeepLocal => {
                // Absorb the relay's version pointer and stay dirty so the
                // next push makes the relay converge to the local content.
                // The local document is not touched.
                self.ctx.store()?.update_resource(
                    &local.id,
                    &ResourcePatch {
                        version: Some(server.version.clone()),
                        dirty: Some(true),
                        ..Default::default()
                    },
                )?;
                debug!("Resolved conflict for {} (local)", local.id);
            }
            Resolution::AcceptRemote => {
                let doc = match self
                    .capture
                    .decrypt_doc(&local.resource_group_id, &server.enc_content, keys)
                    .await
                {
                    Ok(doc) => doc,
                    Err(SyncError::Crypto(e)) => {
                        warn!("Failed to decrypt conflict for {}: {}", local.id, e);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };

                let applied = if server.removed {
                    self.ctx.docs.remove(&doc.doc_type, &doc.id)
                } else {
                    self.ctx.docs.upsert(doc)
                };
                if let Err(e) = applied {
                    warn!("Failed to apply conflict winner for {}: {}", local.id, e);
                    return Ok(());
                }

                self.ctx.store()?.update_resource(
                    &local.id,
                    &ResourcePatch {
                        version: Some(server.version.clone()),
                        enc_content: Some(server.enc_content.clone()),
                        last_edited: (server.last_edited > 0).then_some(server.last_edited),
                        removed: Some(server.removed),
                        dirty: Some(false),
                        ..Default::default()
                    },
                )?;
                debug!("Resolved conflict for {} (server)", local.id);
            }
        }
        Ok(())
    }

    /// Pull remote changes and apply them locally. Returns the number of
    /// resources applied.
    pub async fn pull(&self, resource_group_id: Option<&str>) -> Result<usize> {
        let mut keys = GroupKeyCache::new();
        // Barrier, as for push.
        self.capture.write_pending_changes(&mut keys).await?;

        let query = {
            let store = self.ctx.store()?;
            let resources: Vec<ResourceStub> = store
                .all_active_resources(resource_group_id)?
                .iter()
                .map(ResourceStub::from)
                .collect();
            // A targeted pull excludes every other group; a full pull
            // excludes groups whose config is not active.
            let blacklist: Vec<String> = match resource_group_id {
                Some(group_id) => store
                    .all_configs()?
                    .into_iter()
                    .map(|c| c.resource_group_id)
                    .filter(|id| id != group_id)
                    .collect(),
                None => store
                    .find_inactive_configs()?
                    .into_iter()
                    .map(|c| c.resource_group_id)
                    .collect(),
            };
            PullQuery {
                resource_group_id: resource_group_id.map(str::to_string),
                resources,
                blacklist,
            }
        };

        if !query.resources.is_empty() {
            debug!("Pulling with {} resources", query.resources.len());
        }

        let response = self.ctx.relay.sync_pull(query).await?;

        // Unwrap keys for every mentioned group before taking group locks,
        // so no lock is held across a relay fetch.
        let group_ids: BTreeSet<String> = response
            .created_resources
            .iter()
            .chain(response.updated_resources.iter())
            .map(|r| r.resource_group_id.clone())
            .collect();
        let mut unavailable: HashSet<String> = HashSet::new();
        for group_id in &group_ids {
            match keys.key_for_group(&self.ctx, group_id).await {
                Ok(_) => {}
                Err(SyncError::NotFound(_)) => {
                    warn!("Skipping pulled group {}: gone on relay", group_id);
                    unavailable.insert(group_id.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let mut applied = 0usize;
        for group_id in &group_ids {
            if unavailable.contains(group_id) {
                continue;
            }
            let lock = self.group_lock(group_id);
            let _guard = lock.lock().await;

            for server in response
                .created_resources
                .iter()
                .filter(|r| &r.resource_group_id == group_id)
            {
                if self.apply_created(server, &mut keys).await? {
                    applied += 1;
                }
            }
            for server in response
                .updated_resources
                .iter()
                .filter(|r| &r.resource_group_id == group_id)
            {
                if self.apply_updated(server, &mut keys).await? {
                    applied += 1;
                }
            }
        }

        for id in &response.ids_to_remove {
            let Some(resource) = self.ctx.store()?.get_resource(id)? else {
                warn!("No resource to remove for {}", id);
                continue;
            };
            let lock = self.group_lock(&resource.resource_group_id);
            let _guard = lock.lock().await;

            if let Err(e) = self
                .ctx
                .docs
                .remove(&resource.document_type, &resource.document_id)
            {
                warn!("Failed to remove document {}: {}", resource.document_id, e);
                continue;
            }
            self.ctx.store()?.update_resource(
                id,
                &ResourcePatch {
                    removed: Some(true),
                    dirty: Some(false),
                    ..Default::default()
                },
            )?;
        }

        // Resources the relay believes are stale here get re-pushed.
        let mut groups_to_push: BTreeSet<String> = BTreeSet::new();
        {
            let store = self.ctx.store()?;
            for id in &response.ids_to_push {
                match store.get_resource(id)? {
                    Some(resource) => {
                        store.update_resource(
                            id,
                            &ResourcePatch {
                                dirty: Some(true),
                                ..Default::default()
                            },
                        )?;
                        groups_to_push.insert(resource.resource_group_id);
                    }
                    None => warn!("No resource to push for {}", id),
                }
            }
        }
        for group_id in groups_to_push {
            self.push(Some(&group_id)).await?;
        }

        Ok(applied)
    }

    async fn apply_created(&self, server: &WireResource, keys: &mut GroupKeyCache) -> Result<bool> {
        let doc = match self
            .capture
            .decrypt_doc(&server.resource_group_id, &server.enc_content, keys)
            .await
        {
            Ok(doc) => doc,
            Err(SyncError::Crypto(e)) => {
                warn!("Failed to decode created resource {}: {}", server.id, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let config = self
            .ctx
            .store()?
            .create_or_update_config(&server.resource_group_id, &ConfigPatch::default())?;
        if excluded_by_config(&config, &doc.doc_type) {
            debug!("Skipping pulled excluded {} {}", doc.doc_type, server.id);
            return Ok(false);
        }

        let resource = Resource {
            id: server.id.clone(),
            document_id: doc.id.clone(),
            document_type: doc.doc_type.clone(),
            resource_group_id: server.resource_group_id.clone(),
            version: server.version.clone(),
            name: doc.name.clone(),
            created_by: String::new(),
            last_edited: if server.last_edited > 0 {
                server.last_edited
            } else {
                doc.modified
            },
            last_edited_by: String::new(),
            enc_content: server.enc_content.clone(),
            dirty: false,
            removed: server.removed,
        };

        if let Err(e) = self.ctx.store()?.insert_resource(&resource) {
            // Should never happen, but a rare race can hand us a resource
            // we already have.
            warn!("Failed to insert resource {}: {}", server.id, e);
            return Ok(false);
        }

        if server.removed {
            return Ok(true);
        }
        if let Err(e) = self.ctx.docs.upsert(doc) {
            warn!("Failed to upsert document for {}: {}", server.id, e);
            return Ok(false);
        }
        Ok(true)
    }

    async fn apply_updated(&self, server: &WireResource, keys: &mut GroupKeyCache) -> Result<bool> {
        let doc = match self
            .capture
            .decrypt_doc(&server.resource_group_id, &server.enc_content, keys)
            .await
        {
            Ok(doc) => doc,
            Err(SyncError::Crypto(e)) => {
                warn!("Failed to decode updated resource {}: {}", server.id, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let config = self
            .ctx
            .store()?
            .create_or_update_config(&server.resource_group_id, &ConfigPatch::default())?;
        if excluded_by_config(&config, &doc.doc_type) {
            debug!("Skipping pulled excluded {} {}", doc.doc_type, server.id);
            return Ok(false);
        }

        // Upsert rather than update: this may be undeleting a document.
        if let Err(e) = self.ctx.docs.upsert(doc.clone()) {
            warn!("Failed to upsert document for {}: {}", server.id, e);
            return Ok(false);
        }

        let store = self.ctx.store()?;
        match store.get_resource(&server.id)? {
            Some(_) => {
                store.update_resource(
                    &server.id,
                    &ResourcePatch {
                        version: Some(server.version.clone()),
                        enc_content: Some(server.enc_content.clone()),
                        last_edited: (server.last_edited > 0).then_some(server.last_edited),
                        name: Some(doc.name.clone()),
                        removed: Some(server.removed),
                        dirty: Some(false),
                        ..Default::default()
                    },
                )?;
            }
            None => {
                store.insert_resource(&Resource {
                    id: server.id.clone(),
                    document_id: doc.id.clone(),
                    document_type: doc.doc_type.clone(),
                    resource_group_id: server.resource_group_id.clone(),
                    version: server.version.clone(),
                    name: doc.name.clone(),
                    created_by: String::new(),
                    last_edited: if server.last_edited > 0 {
                        server.last_edited
                    } else {
                        doc.modified
                    },
                    last_edited_by: String::new(),
                    enc_content: server.enc_content.clone(),
                    dirty: false,
                    removed: server.removed,
                })?;
            }
        }
        Ok(true)
    }

    /// Drop all sync metadata (logout).
    pub fn reset_local_data(&self) -> Result<()> {
        self.ctx.store()?.reset_local_data()?;
        Ok(())
    }

    fn group_lock(&self, group_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.group_locks.lock().expect("group locks");
        locks
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

fn excluded_by_config(config: &Config, document_type: &str) -> bool {
    (document_type == doc_types::COOKIE_JAR && config.exclude_cookie_jars)
        || (document_type == doc_types::CLIENT_CERTIFICATE && config.exclude_client_certificates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{
        encrypt_aes, generate_key_pair_jwk, KeyPairJwk, SymmetricKey, SymmetricKeyJwk,
    };
    use crate::document::MemoryDocumentStore;
    use crate::relay::{PullResponse, VersionAck};
    use crate::store::{ResourceGroup, SyncMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    fn account_key_pair() -> &'static KeyPairJwk {
        static PAIR: OnceLock<KeyPairJwk> = OnceLock::new();
        PAIR.get_or_init(|| generate_key_pair_jwk().unwrap())
    }

    fn test_session() -> Session {
        let pair = account_key_pair();
        let account_key = SymmetricKey::from_bytes([7u8; 32]);
        let private_json = serde_json::to_vec(&pair.private_key).unwrap();
        let enc_private_key = encrypt_aes(&account_key, &private_json, b"").unwrap();
        Session::new(
            "acct_123",
            "tammy@example.com",
            "Tammy",
            "Tester",
            "ses_123",
            SymmetricKeyJwk::from_key_bytes(account_key.as_bytes()),
            pair.public_key.clone(),
            enc_private_key,
        )
    }

    /// Relay double with scripted responses and recorded calls.
    #[derive(Default)]
    struct ScriptedRelay {
        groups: Mutex<HashMap<String, ResourceGroup>>,
        group_counter: AtomicUsize,
        push_responses: Mutex<VecDeque<PushResponse>>,
        pull_responses: Mutex<VecDeque<PullResponse>>,
        pushes: Mutex<Vec<Vec<WireResource>>>,
        pulls: Mutex<Vec<PullQuery>>,
        fail_next_group_create: std::sync::atomic::AtomicBool,
    }

    impl ScriptedRelay {
        fn script_push(&self, response: PushResponse) {
            self.push_responses.lock().unwrap().push_back(response);
        }

        fn script_pull(&self, response: PullResponse) {
            self.pull_responses.lock().unwrap().push_back(response);
        }

        fn push_calls(&self) -> Vec<Vec<WireResource>> {
            self.pushes.lock().unwrap().clone()
        }

        fn pull_calls(&self) -> Vec<PullQuery> {
            self.pulls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RelayClient for ScriptedRelay {
        async fn sync_push(&self, resources: Vec<WireResource>) -> Result<PushResponse> {
            self.pushes.lock().unwrap().push(resources);
            Ok(self
                .push_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn sync_pull(&self, query: PullQuery) -> Result<PullResponse> {
            self.pulls.lock().unwrap().push(query);
            Ok(self
                .pull_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn sync_create_resource_group(
            &self,
            parent_resource_id: &str,
            name: &str,
            enc_symmetric_key: &str,
        ) -> Result<ResourceGroup> {
            if self.fail_next_group_create.swap(false, Ordering::SeqCst) {
                return Err(SyncError::Network("relay unreachable".to_string()));
            }
            let n = self.group_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let group = ResourceGroup {
                id: format!("rg_{}", n),
                name: name.to_string(),
                parent_resource_id: parent_resource_id.to_string(),
                enc_symmetric_key: enc_symmetric_key.to_string(),
            };
            self.groups
                .lock()
                .unwrap()
                .insert(group.id.clone(), group.clone());
            Ok(group)
        }

        async fn sync_get_resource_group(&self, id: &str) -> Result<ResourceGroup> {
            self.groups
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(id.to_string()))
        }
    }

    struct Harness {
        engine: SyncEngine,
        relay: Arc<ScriptedRelay>,
        docs: Arc<MemoryDocumentStore>,
    }

    impl Harness {
        fn resource(&self, id: &str) -> Resource {
            self.engine
                .ctx
                .store()
                .unwrap()
                .get_resource(id)
                .unwrap()
                .unwrap()
        }

        fn group_of(&self, doc_id: &str) -> String {
            self.resource(doc_id).resource_group_id
        }

        fn set_mode(&self, group_id: &str, mode: SyncMode) {
            self.engine
                .ctx
                .store()
                .unwrap()
                .create_or_update_config(
                    group_id,
                    &ConfigPatch {
                        sync_mode: Some(mode),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
    }

    fn make_doc(id: &str, doc_type: &str, parent: Option<&str>, name: &str) -> Document {
        Document {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            doc_type: doc_type.to_string(),
            name: name.to_string(),
            modified: 1_700_000_000_000,
            is_private: false,
            body: serde_json::json!({ "url": "https://example.com" }),
        }
    }

    /// Two workspaces, each with one request, all captured as resources.
    async fn setup() -> Harness {
        let relay = Arc::new(ScriptedRelay::default());
        let docs = Arc::new(MemoryDocumentStore::new());
        let engine = SyncEngine::new(
            SyncStore::in_memory().unwrap(),
            docs.clone(),
            relay.clone(),
            test_session(),
        );

        let fixtures = [
            ("wrk_1", doc_types::WORKSPACE, None, "Workspace 1"),
            ("wrk_2", doc_types::WORKSPACE, None, "Workspace 2"),
            ("req_1", doc_types::REQUEST, Some("wrk_1"), "Request 1"),
            ("req_2", doc_types::REQUEST, Some("wrk_2"), "Request 2"),
        ];
        for (id, doc_type, parent, name) in fixtures {
            let doc = make_doc(id, doc_type, parent, name);
            docs.upsert(doc.clone()).unwrap();
            engine.queue_change(ChangeEvent::Insert, &doc);
        }
        engine.write_pending_changes().await.unwrap();

        Harness {
            engine,
            relay,
            docs,
        }
    }

    async fn encrypt_for_test(h: &Harness, group_id: &str, doc: &Document) -> String {
        let mut keys = GroupKeyCache::new();
        h.engine
            .capture
            .encrypt_doc(group_id, doc, &mut keys)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn push_targets_active_groups_and_orders_root_first() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let rg2 = h.group_of("req_2");
        h.set_mode(&rg1, SyncMode::On);

        h.engine.push(None).await.unwrap();
        h.engine.push(Some(&rg1)).await.unwrap();
        h.engine.push(Some(&rg2)).await.unwrap();

        let calls = h.relay.push_calls();
        assert_eq!(calls.len(), 3);

        // Background push covers only the active group, root first.
        let ids: Vec<&str> = calls[0].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["wrk_1", "req_1"]);

        // Forced pushes ignore sync mode.
        let ids: Vec<&str> = calls[1].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["wrk_1", "req_1"]);
        let ids: Vec<&str> = calls[2].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["wrk_2", "req_2"]);
    }

    #[tokio::test]
    async fn push_acks_clear_dirty_and_set_version() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");

        h.relay.script_push(PushResponse {
            created: vec![
                VersionAck {
                    id: "wrk_1".to_string(),
                    version: "v-wrk".to_string(),
                },
                VersionAck {
                    id: "req_1".to_string(),
                    version: "v-req".to_string(),
                },
            ],
            ..Default::default()
        });

        assert!(h.resource("req_1").dirty);
        h.engine.push(Some(&rg1)).await.unwrap();

        let req = h.resource("req_1");
        assert!(!req.dirty);
        assert_eq!(req.version, "v-req");
        assert_eq!(h.resource("wrk_1").version, "v-wrk");
    }

    #[tokio::test]
    async fn conflict_local_wins_when_strictly_newer() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let local = h.resource("req_1");

        let server_doc = make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Server Request");
        let conflict = WireResource {
            id: "req_1".to_string(),
            resource_group_id: rg1.clone(),
            version: "ver-2".to_string(),
            document_type: doc_types::REQUEST.to_string(),
            enc_content: encrypt_for_test(&h, &rg1, &server_doc).await,
            last_edited: local.last_edited - 1000,
            removed: false,
        };
        h.relay.script_push(PushResponse {
            conflicts: vec![conflict],
            ..Default::default()
        });

        h.engine.push(Some(&rg1)).await.unwrap();

        let after = h.resource("req_1");
        // The relay's version pointer is absorbed so the re-push lands.
        assert_eq!(after.version, "ver-2");
        assert!(after.dirty);
        // The local document content is untouched.
        assert_eq!(h.docs.get_any("req_1").unwrap().name, "Request 1");
    }

    #[tokio::test]
    async fn conflict_tie_prefers_remote() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let local = h.resource("req_1");

        let server_doc = make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Server Request");
        let conflict = WireResource {
            id: "req_1".to_string(),
            resource_group_id: rg1.clone(),
            version: "ver-2".to_string(),
            document_type: doc_types::REQUEST.to_string(),
            enc_content: encrypt_for_test(&h, &rg1, &server_doc).await,
            last_edited: local.last_edited,
            removed: false,
        };
        h.relay.script_push(PushResponse {
            conflicts: vec![conflict],
            ..Default::default()
        });

        h.engine.push(Some(&rg1)).await.unwrap();

        let after = h.resource("req_1");
        assert_eq!(after.version, "ver-2");
        assert!(!after.dirty);
        assert_eq!(h.docs.get_any("req_1").unwrap().name, "Server Request");
    }

    #[tokio::test]
    async fn conflict_remote_wins_when_strictly_newer() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let local = h.resource("req_1");

        let mut server_doc =
            make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Server Request");
        server_doc.modified = local.last_edited + 1000;
        let conflict = WireResource {
            id: "req_1".to_string(),
            resource_group_id: rg1.clone(),
            version: "ver-2".to_string(),
            document_type: doc_types::REQUEST.to_string(),
            enc_content: encrypt_for_test(&h, &rg1, &server_doc).await,
            last_edited: local.last_edited + 1000,
            removed: false,
        };
        h.relay.script_push(PushResponse {
            conflicts: vec![conflict],
            ..Default::default()
        });

        h.engine.push(Some(&rg1)).await.unwrap();

        let after = h.resource("req_1");
        assert_eq!(after.version, "ver-2");
        assert!(!after.dirty);
        assert_eq!(after.last_edited, local.last_edited + 1000);

        // The document carries its own stamp from the decrypted payload.
        let doc = h.docs.get_any("req_1").unwrap();
        assert_eq!(doc.name, "Server Request");
        assert_eq!(doc.modified, local.last_edited + 1000);
    }

    #[tokio::test]
    async fn malformed_conflict_record_prefers_remote() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");

        let server_doc = make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Server Request");
        let conflict = WireResource {
            id: "req_1".to_string(),
            resource_group_id: rg1.clone(),
            version: "ver-2".to_string(),
            document_type: doc_types::REQUEST.to_string(),
            enc_content: encrypt_for_test(&h, &rg1, &server_doc).await,
            last_edited: 0, // missing on the wire
            removed: false,
        };
        h.relay.script_push(PushResponse {
            conflicts: vec![conflict],
            ..Default::default()
        });

        h.engine.push(Some(&rg1)).await.unwrap();

        assert_eq!(h.docs.get_any("req_1").unwrap().name, "Server Request");
        assert!(!h.resource("req_1").dirty);
    }

    #[tokio::test]
    async fn undecryptable_conflict_is_skipped() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let local = h.resource("req_1");

        let wrong_key = SymmetricKey::generate();
        let bad_content = serde_json::to_string(
            &encrypt_aes(&wrong_key, b"{\"not\":\"ours\"}", b"").unwrap(),
        )
        .unwrap();
        let conflict = WireResource {
            id: "req_1".to_string(),
            resource_group_id: rg1.clone(),
            version: "ver-2".to_string(),
            document_type: doc_types::REQUEST.to_string(),
            enc_content: bad_content,
            last_edited: local.last_edited + 1000,
            removed: false,
        };
        h.relay.script_push(PushResponse {
            conflicts: vec![conflict],
            ..Default::default()
        });

        // The poisoned record is skipped, not fatal for the push.
        h.engine.push(Some(&rg1)).await.unwrap();
        assert_eq!(h.docs.get_any("req_1").unwrap().name, "Request 1");
    }

    #[tokio::test]
    async fn tombstone_revival_keeps_single_resource() {
        let h = setup().await;
        let doc = h.docs.get_any("req_1").unwrap();

        h.docs.remove(doc_types::REQUEST, "req_1").unwrap();
        h.engine.queue_change(ChangeEvent::Remove, &doc);
        h.engine.write_pending_changes().await.unwrap();
        assert!(h.resource("req_1").removed);
        assert!(h.resource("req_1").dirty);

        let recreated = make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Recreated");
        h.docs.upsert(recreated.clone()).unwrap();
        h.engine.queue_change(ChangeEvent::Insert, &recreated);
        h.engine.write_pending_changes().await.unwrap();

        let all = h
            .engine
            .ctx
            .store()
            .unwrap()
            .find_resources_by_doc_id("req_1")
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].removed);
        assert!(all[0].dirty);
    }

    #[tokio::test]
    async fn off_mode_captures_dirty_state_but_skips_background_push() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        h.set_mode(&rg1, SyncMode::Off);

        let mut doc = h.docs.get_any("req_1").unwrap();
        doc.name = "Edited While Off".to_string();
        h.docs.upsert(doc.clone()).unwrap();
        h.engine.queue_change(ChangeEvent::Update, &doc);
        h.engine.write_pending_changes().await.unwrap();

        // Dirty state is preserved locally even though the group is off.
        assert!(h.resource("req_1").dirty);

        h.engine.push(None).await.unwrap();
        assert!(h.relay.push_calls().is_empty());

        // A forced push ignores the mode.
        h.engine.push(Some(&rg1)).await.unwrap();
        assert_eq!(h.relay.push_calls().len(), 1);
    }

    #[tokio::test]
    async fn pull_applies_created_updated_and_removed() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        h.set_mode(&rg1, SyncMode::On);

        let mut updated_doc = make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Request Updated");
        updated_doc.modified = 1_700_000_001_000;
        let new_doc = make_doc("req_new", doc_types::REQUEST, Some("wrk_1"), "New Request");

        h.relay.script_pull(PullResponse {
            updated_resources: vec![WireResource {
                id: "req_1".to_string(),
                resource_group_id: rg1.clone(),
                version: "ver1".to_string(),
                document_type: doc_types::REQUEST.to_string(),
                enc_content: encrypt_for_test(&h, &rg1, &updated_doc).await,
                last_edited: updated_doc.modified,
                removed: false,
            }],
            created_resources: vec![WireResource {
                id: "req_new".to_string(),
                resource_group_id: rg1.clone(),
                version: "v1".to_string(),
                document_type: doc_types::REQUEST.to_string(),
                enc_content: encrypt_for_test(&h, &rg1, &new_doc).await,
                last_edited: new_doc.modified,
                removed: false,
            }],
            ids_to_push: vec![],
            ids_to_remove: vec!["req_2".to_string()],
        });

        let applied = h.engine.pull(None).await.unwrap();
        assert_eq!(applied, 2);

        // Updated document landed along with the server version.
        assert_eq!(h.docs.get_any("req_1").unwrap().name, "Request Updated");
        let req1 = h.resource("req_1");
        assert_eq!(req1.version, "ver1");
        assert!(!req1.dirty);

        // Created document exists with a clean resource.
        assert_eq!(h.docs.get_any("req_new").unwrap().name, "New Request");
        assert!(!h.resource("req_new").dirty);

        // Removed id lost its document and kept a tombstone.
        assert!(h.docs.get_any("req_2").is_none());
        let req2 = h.resource("req_2");
        assert!(req2.removed);
        assert!(!req2.dirty);
    }

    #[tokio::test]
    async fn pull_blacklists_inactive_groups() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        let rg2 = h.group_of("req_2");
        h.set_mode(&rg1, SyncMode::On);

        h.engine.pull(None).await.unwrap();

        let calls = h.relay.pull_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].blacklist.contains(&rg1));
        assert!(calls[0].blacklist.contains(&rg2));
        assert_eq!(calls[0].resources.len(), 4);
    }

    #[tokio::test]
    async fn pull_ids_to_push_triggers_follow_up_push() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        h.set_mode(&rg1, SyncMode::On);

        h.relay.script_pull(PullResponse {
            ids_to_push: vec!["req_1".to_string()],
            ..Default::default()
        });

        h.engine.pull(None).await.unwrap();

        let calls = h.relay.push_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().any(|r| r.id == "req_1"));
    }

    #[tokio::test]
    async fn pull_skips_undecryptable_resource_and_applies_rest() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        h.set_mode(&rg1, SyncMode::On);

        let good_doc = make_doc("req_good", doc_types::REQUEST, Some("wrk_1"), "Good");
        let wrong_key = SymmetricKey::generate();
        let poisoned = serde_json::to_string(
            &encrypt_aes(&wrong_key, b"{\"not\":\"ours\"}", b"").unwrap(),
        )
        .unwrap();

        h.relay.script_pull(PullResponse {
            created_resources: vec![
                WireResource {
                    id: "req_bad".to_string(),
                    resource_group_id: rg1.clone(),
                    version: "v1".to_string(),
                    document_type: doc_types::REQUEST.to_string(),
                    enc_content: poisoned,
                    last_edited: 1,
                    removed: false,
                },
                WireResource {
                    id: "req_good".to_string(),
                    resource_group_id: rg1.clone(),
                    version: "v1".to_string(),
                    document_type: doc_types::REQUEST.to_string(),
                    enc_content: encrypt_for_test(&h, &rg1, &good_doc).await,
                    last_edited: good_doc.modified,
                    removed: false,
                },
            ],
            ..Default::default()
        });

        let applied = h.engine.pull(None).await.unwrap();
        assert_eq!(applied, 1);
        assert!(h.docs.get_any("req_good").is_some());
        assert!(h.docs.get_any("req_bad").is_none());
        assert!(h
            .engine
            .ctx
            .store()
            .unwrap()
            .get_resource("req_bad")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn init_bootstraps_eligible_documents_once() {
        let relay = Arc::new(ScriptedRelay::default());
        let docs = Arc::new(MemoryDocumentStore::new());
        let engine = SyncEngine::new(
            SyncStore::in_memory().unwrap(),
            docs.clone(),
            relay.clone(),
            test_session(),
        );

        docs.upsert(make_doc("wrk_1", doc_types::WORKSPACE, None, "Workspace 1"))
            .unwrap();
        docs.upsert(make_doc("req_1", doc_types::REQUEST, Some("wrk_1"), "Request 1"))
            .unwrap();
        let mut private_env = make_doc("env_1", doc_types::ENVIRONMENT, Some("wrk_1"), "Env");
        private_env.is_private = true;
        docs.upsert(private_env).unwrap();
        docs.upsert(make_doc("set_1", "Settings", Some("wrk_1"), "Settings"))
            .unwrap();

        engine.init().await.unwrap();

        let store = engine.ctx.store().unwrap();
        let resources = store.all_resources().unwrap();
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["req_1", "wrk_1"]);
        assert_eq!(store.all_configs().unwrap().len(), 1);
        assert_eq!(
            store.all_configs().unwrap()[0].sync_mode,
            SyncMode::Unset
        );
        drop(store);

        // Running init again creates nothing new.
        engine.init().await.unwrap();
        assert_eq!(engine.ctx.store().unwrap().all_resources().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_or_create_resource_is_idempotent() {
        let h = setup().await;
        let doc = h.docs.get_any("req_1").unwrap();

        let mut keys = GroupKeyCache::new();
        let first = h
            .engine
            .capture
            .get_or_create_resource_for_doc(&doc, &mut keys)
            .await
            .unwrap();
        let second = h
            .engine
            .capture
            .get_or_create_resource_for_doc(&doc, &mut keys)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            h.engine
                .ctx
                .store()
                .unwrap()
                .find_resources_by_doc_id("req_1")
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn excluded_types_are_not_pushed() {
        let h = setup().await;
        let rg1 = h.group_of("req_1");
        h.engine
            .ctx
            .store()
            .unwrap()
            .create_or_update_config(
                &rg1,
                &ConfigPatch {
                    sync_mode: Some(SyncMode::On),
                    exclude_cookie_jars: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let jar = make_doc("jar_1", doc_types::COOKIE_JAR, Some("wrk_1"), "Cookies");
        h.docs.upsert(jar.clone()).unwrap();
        h.engine.queue_change(ChangeEvent::Insert, &jar);
        h.engine.write_pending_changes().await.unwrap();

        h.engine.push(Some(&rg1)).await.unwrap();

        let calls = h.relay.push_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].iter().any(|r| r.id == "jar_1"));
        // The jar resource still exists locally, dirty, for when the
        // exclusion is lifted.
        assert!(h.resource("jar_1").dirty);
    }

    #[tokio::test]
    async fn network_failure_during_drain_requeues_changes() {
        let relay = Arc::new(ScriptedRelay::default());
        let docs = Arc::new(MemoryDocumentStore::new());
        let engine = SyncEngine::new(
            SyncStore::in_memory().unwrap(),
            docs.clone(),
            relay.clone(),
            test_session(),
        );

        for (id, doc_type, parent) in [
            ("wrk_1", doc_types::WORKSPACE, None),
            ("req_1", doc_types::REQUEST, Some("wrk_1")),
        ] {
            let doc = make_doc(id, doc_type, parent, id);
            docs.upsert(doc.clone()).unwrap();
            engine.queue_change(ChangeEvent::Insert, &doc);
        }

        relay
            .fail_next_group_create
            .store(true, Ordering::SeqCst);
        let err = engine.write_pending_changes().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        // Nothing was lost; the whole buffer replays on the next drain.
        assert_eq!(engine.capture().pending_count(), 2);

        assert_eq!(engine.write_pending_changes().await.unwrap(), 2);
        assert_eq!(engine.capture().pending_count(), 0);
        assert!(engine
            .store()
            .unwrap()
            .get_resource("req_1")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn rootless_change_is_dropped_and_drain_continues() {
        let relay = Arc::new(ScriptedRelay::default());
        let docs = Arc::new(MemoryDocumentStore::new());
        let engine = SyncEngine::new(
            SyncStore::in_memory().unwrap(),
            docs.clone(),
            relay.clone(),
            test_session(),
        );

        // The orphan's parent does not exist anywhere.
        let orphan = make_doc("req_lost", doc_types::REQUEST, Some("wrk_gone"), "Orphan");
        docs.upsert(orphan.clone()).unwrap();
        engine.queue_change(ChangeEvent::Insert, &orphan);

        let workspace = make_doc("wrk_1", doc_types::WORKSPACE, None, "Workspace 1");
        docs.upsert(workspace.clone()).unwrap();
        engine.queue_change(ChangeEvent::Insert, &workspace);

        // The orphan is dropped; the workspace behind it still lands.
        assert_eq!(engine.write_pending_changes().await.unwrap(), 1);
        assert_eq!(engine.capture().pending_count(), 0);
        let store = engine.store().unwrap();
        assert!(store.get_resource("req_lost").unwrap().is_none());
        assert!(store.get_resource("wrk_1").unwrap().is_some());
    }

    #[tokio::test]
    async fn coalesced_edits_drain_to_one_update() {
        let h = setup().await;

        let mut doc = h.docs.get_any("req_1").unwrap();
        for name in ["a", "ab", "abc"] {
            doc.name = name.to_string();
            h.docs.upsert(doc.clone()).unwrap();
            h.engine.queue_change(ChangeEvent::Update, &doc);
        }
        assert_eq!(h.engine.capture().pending_count(), 1);

        let drained = h.engine.write_pending_changes().await.unwrap();
        assert_eq!(drained, 1);
        assert_eq!(h.resource("req_1").name, "abc");
    }
}
