//! Resource store: the local mirror of synchronization metadata.
//!
//! Persists three record kinds (`Resource`, `ResourceGroup`, `Config`)
//! keyed by id, independent of the document store. Backed by SQLite with
//! an in-memory mode for test isolation. The store is the single source
//! of truth for dirty/version state; the change capture bridge and the
//! sync engine mutate it only through the operations defined here.

pub mod models;

pub use models::{
    Config, ConfigPatch, Resource, ResourceGroup, ResourcePatch, SyncMode, NO_VERSION,
};

use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

/// Errors from the resource store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

type Result<T> = std::result::Result<T, StoreError>;

/// Connection and schema manager for sync metadata.
pub struct SyncStore {
    conn: Connection,
}

impl SyncStore {
    /// Open a store at the specified path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self { conn };
        store.init_db(false)?;
        Ok(store)
    }

    /// Create a new in-memory store for testing; nothing is persisted.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self { conn };
        store.init_db(false)?;
        Ok(store)
    }

    /// Create the schema. Idempotent unless `force`, which drops all sync
    /// metadata first.
    pub fn init_db(&self, force: bool) -> Result<()> {
        if force {
            self.conn.execute("DROP TABLE IF EXISTS resources", [])?;
            self.conn.execute("DROP TABLE IF EXISTS resource_groups", [])?;
            self.conn.execute("DROP TABLE IF EXISTS sync_configs", [])?;
        }

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                document_type TEXT NOT NULL,
                resource_group_id TEXT NOT NULL,
                version TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL DEFAULT '',
                last_edited INTEGER NOT NULL,
                last_edited_by TEXT NOT NULL DEFAULT '',
                enc_content TEXT NOT NULL,
                dirty INTEGER NOT NULL,
                removed INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        // One live resource per document per group; tombstones don't count.
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_resources_live_doc
             ON resources(document_id, resource_group_id) WHERE removed = 0",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_resources_group
             ON resources(resource_group_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_resources_dirty
             ON resources(dirty)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS resource_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                parent_resource_id TEXT NOT NULL,
                enc_symmetric_key TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_configs (
                resource_group_id TEXT PRIMARY KEY,
                sync_mode TEXT NOT NULL DEFAULT 'unset',
                exclude_cookie_jars INTEGER NOT NULL DEFAULT 0,
                exclude_client_certificates INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(())
    }

    // --- Resources ---

    /// Get a resource by its id.
    pub fn get_resource(&self, id: &str) -> Result<Option<Resource>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE id = ?1", RESOURCE_COLUMNS),
                [id],
                row_to_resource,
            );
        optional(result)
    }

    /// Get the live (or, failing that, tombstoned) resource for a document.
    ///
    /// When `resource_group_id` is omitted, matches on the document id
    /// alone; the caller must ensure uniqueness holds.
    pub fn get_resource_by_doc_id(
        &self,
        doc_id: &str,
        resource_group_id: Option<&str>,
    ) -> Result<Option<Resource>> {
        let result = match resource_group_id {
            Some(group_id) => self.conn.query_row(
                &format!(
                    "SELECT {} FROM resources
                     WHERE document_id = ?1 AND resource_group_id = ?2
                     ORDER BY removed ASC LIMIT 1",
                    RESOURCE_COLUMNS
                ),
                params![doc_id, group_id],
                row_to_resource,
            ),
            None => self.conn.query_row(
                &format!(
                    "SELECT {} FROM resources
                     WHERE document_id = ?1
                     ORDER BY removed ASC LIMIT 1",
                    RESOURCE_COLUMNS
                ),
                [doc_id],
                row_to_resource,
            ),
        };
        optional(result)
    }

    /// All resources recorded for a document id, live and tombstoned.
    pub fn find_resources_by_doc_id(&self, doc_id: &str) -> Result<Vec<Resource>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM resources WHERE document_id = ?1 ORDER BY id",
            RESOURCE_COLUMNS
        ))?;
        let rows = stmt.query_map([doc_id], row_to_resource)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// All resources, including tombstones.
    pub fn all_resources(&self) -> Result<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM resources ORDER BY id", RESOURCE_COLUMNS))?;
        let rows = stmt.query_map([], row_to_resource)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Non-tombstoned resources, optionally restricted to one group.
    pub fn all_active_resources(&self, resource_group_id: Option<&str>) -> Result<Vec<Resource>> {
        let mut stmt;
        let rows = match resource_group_id {
            Some(group_id) => {
                stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM resources
                     WHERE removed = 0 AND resource_group_id = ?1 ORDER BY id",
                    RESOURCE_COLUMNS
                ))?;
                stmt.query_map([group_id], row_to_resource)?
            }
            None => {
                stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM resources WHERE removed = 0 ORDER BY id",
                    RESOURCE_COLUMNS
                ))?;
                stmt.query_map([], row_to_resource)?
            }
        };
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Dirty resources awaiting push, optionally restricted to one group.
    ///
    /// Tombstones are included; deletions must propagate too.
    pub fn find_dirty_resources(&self, resource_group_id: Option<&str>) -> Result<Vec<Resource>> {
        let mut stmt;
        let rows = match resource_group_id {
            Some(group_id) => {
                stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM resources
                     WHERE dirty = 1 AND resource_group_id = ?1 ORDER BY id",
                    RESOURCE_COLUMNS
                ))?;
                stmt.query_map([group_id], row_to_resource)?
            }
            None => {
                stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM resources WHERE dirty = 1 ORDER BY id",
                    RESOURCE_COLUMNS
                ))?;
                stmt.query_map([], row_to_resource)?
            }
        };
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Insert a resource.
    pub fn insert_resource(&self, resource: &Resource) -> Result<()> {
        self.conn.execute(
            "INSERT INTO resources (
                id, document_id, document_type, resource_group_id, version,
                name, created_by, last_edited, last_edited_by, enc_content,
                dirty, removed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                resource.id,
                resource.document_id,
                resource.document_type,
                resource.resource_group_id,
                resource.version,
                resource.name,
                resource.created_by,
                resource.last_edited,
                resource.last_edited_by,
                resource.enc_content,
                resource.dirty,
                resource.removed,
            ],
        )?;
        Ok(())
    }

    /// Merge a patch into a resource and return the updated record.
    pub fn update_resource(&self, id: &str, patch: &ResourcePatch) -> Result<Resource> {
        let mut resource = self
            .get_resource(id)?
            .ok_or_else(|| StoreError::Other(format!("No resource {}", id)))?;

        if let Some(version) = &patch.version {
            resource.version = version.clone();
        }
        if let Some(name) = &patch.name {
            resource.name = name.clone();
        }
        if let Some(last_edited) = patch.last_edited {
            resource.last_edited = last_edited;
        }
        if let Some(last_edited_by) = &patch.last_edited_by {
            resource.last_edited_by = last_edited_by.clone();
        }
        if let Some(enc_content) = &patch.enc_content {
            resource.enc_content = enc_content.clone();
        }
        if let Some(dirty) = patch.dirty {
            resource.dirty = dirty;
        }
        if let Some(removed) = patch.removed {
            resource.removed = removed;
        }

        self.conn.execute(
            "UPDATE resources SET
                version = ?1, name = ?2, last_edited = ?3, last_edited_by = ?4,
                enc_content = ?5, dirty = ?6, removed = ?7
             WHERE id = ?8",
            params![
                resource.version,
                resource.name,
                resource.last_edited,
                resource.last_edited_by,
                resource.enc_content,
                resource.dirty,
                resource.removed,
                resource.id,
            ],
        )?;

        Ok(resource)
    }

    /// Physically delete a resource (duplicate cleanup and local reset only;
    /// sync flows tombstone instead).
    pub fn remove_resource(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM resources WHERE id = ?1", [id])?;
        Ok(())
    }

    // --- Resource groups ---

    /// Get a locally cached resource group.
    pub fn get_resource_group(&self, id: &str) -> Result<Option<ResourceGroup>> {
        let result = self.conn.query_row(
            "SELECT id, name, parent_resource_id, enc_symmetric_key
             FROM resource_groups WHERE id = ?1",
            [id],
            |row| {
                Ok(ResourceGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_resource_id: row.get(2)?,
                    enc_symmetric_key: row.get(3)?,
                })
            },
        );
        optional(result)
    }

    /// Cache a resource group locally (upsert; groups are immutable server-side).
    pub fn insert_resource_group(&self, group: &ResourceGroup) -> Result<()> {
        self.conn.execute(
            "INSERT INTO resource_groups (id, name, parent_resource_id, enc_symmetric_key)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                parent_resource_id = excluded.parent_resource_id,
                enc_symmetric_key = excluded.enc_symmetric_key",
            params![
                group.id,
                group.name,
                group.parent_resource_id,
                group.enc_symmetric_key,
            ],
        )?;
        Ok(())
    }

    /// Remove a resource group along with its resources and config.
    ///
    /// Used when the relay reports the group gone or disabled.
    pub fn remove_resource_group(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM resources WHERE resource_group_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM sync_configs WHERE resource_group_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM resource_groups WHERE id = ?1", [id])?;
        Ok(())
    }

    // --- Configs ---

    /// Get the config for a group.
    pub fn get_config(&self, resource_group_id: &str) -> Result<Option<Config>> {
        let result = self.conn.query_row(
            "SELECT resource_group_id, sync_mode, exclude_cookie_jars,
                    exclude_client_certificates
             FROM sync_configs WHERE resource_group_id = ?1",
            [resource_group_id],
            row_to_config,
        );
        optional(result)
    }

    /// All configs.
    pub fn all_configs(&self) -> Result<Vec<Config>> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_group_id, sync_mode, exclude_cookie_jars,
                    exclude_client_certificates
             FROM sync_configs ORDER BY resource_group_id",
        )?;
        let rows = stmt.query_map([], row_to_config)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Configs whose groups participate in background sync.
    pub fn find_active_configs(&self) -> Result<Vec<Config>> {
        Ok(self
            .all_configs()?
            .into_iter()
            .filter(|c| c.sync_mode == SyncMode::On)
            .collect())
    }

    /// Configs whose mode excludes them from background sync.
    pub fn find_inactive_configs(&self) -> Result<Vec<Config>> {
        Ok(self
            .all_configs()?
            .into_iter()
            .filter(|c| c.sync_mode != SyncMode::On)
            .collect())
    }

    /// Insert a config row.
    pub fn insert_config(&self, config: &Config) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_configs (
                resource_group_id, sync_mode, exclude_cookie_jars,
                exclude_client_certificates
            ) VALUES (?1, ?2, ?3, ?4)",
            params![
                config.resource_group_id,
                config.sync_mode.as_str(),
                config.exclude_cookie_jars,
                config.exclude_client_certificates,
            ],
        )?;
        Ok(())
    }

    /// Merge a patch into the config for a group, creating it first if it
    /// does not exist.
    pub fn create_or_update_config(
        &self,
        resource_group_id: &str,
        patch: &ConfigPatch,
    ) -> Result<Config> {
        let mut config = match self.get_config(resource_group_id)? {
            Some(config) => config,
            None => {
                let config = Config::new_unset(resource_group_id);
                self.insert_config(&config)?;
                config
            }
        };

        if let Some(sync_mode) = patch.sync_mode {
            config.sync_mode = sync_mode;
        }
        if let Some(v) = patch.exclude_cookie_jars {
            config.exclude_cookie_jars = v;
        }
        if let Some(v) = patch.exclude_client_certificates {
            config.exclude_client_certificates = v;
        }

        self.conn.execute(
            "UPDATE sync_configs SET
                sync_mode = ?1, exclude_cookie_jars = ?2,
                exclude_client_certificates = ?3
             WHERE resource_group_id = ?4",
            params![
                config.sync_mode.as_str(),
                config.exclude_cookie_jars,
                config.exclude_client_certificates,
                config.resource_group_id,
            ],
        )?;

        Ok(config)
    }

    /// Wipe all sync metadata (logout path).
    pub fn reset_local_data(&self) -> Result<()> {
        self.conn.execute("DELETE FROM resources", [])?;
        self.conn.execute("DELETE FROM resource_groups", [])?;
        self.conn.execute("DELETE FROM sync_configs", [])?;
        Ok(())
    }
}

const RESOURCE_COLUMNS: &str = "id, document_id, document_type, resource_group_id, version, \
     name, created_by, last_edited, last_edited_by, enc_content, dirty, removed";

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        document_id: row.get(1)?,
        document_type: row.get(2)?,
        resource_group_id: row.get(3)?,
        version: row.get(4)?,
        name: row.get(5)?,
        created_by: row.get(6)?,
        last_edited: row.get(7)?,
        last_edited_by: row.get(8)?,
        enc_content: row.get(9)?,
        dirty: row.get(10)?,
        removed: row.get(11)?,
    })
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<Config> {
    let mode: String = row.get(1)?;
    Ok(Config {
        resource_group_id: row.get(0)?,
        sync_mode: SyncMode::parse(&mode),
        exclude_cookie_jars: row.get(2)?,
        exclude_client_certificates: row.get(3)?,
    })
}

fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Sqlite(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_resource(id: &str, doc_id: &str, group_id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            document_type: "Request".to_string(),
            resource_group_id: group_id.to_string(),
            version: NO_VERSION.to_string(),
            name: "Test".to_string(),
            created_by: "acct_1".to_string(),
            last_edited: 1_700_000_000_000,
            last_edited_by: "acct_1".to_string(),
            enc_content: "{\"iv\":\"\",\"d\":\"\",\"t\":\"\",\"ad\":\"\"}".to_string(),
            dirty: true,
            removed: false,
        }
    }

    #[test]
    fn init_db_is_idempotent() {
        let store = SyncStore::in_memory().unwrap();
        store.init_db(false).unwrap();
        store.init_db(false).unwrap();
    }

    #[test]
    fn init_db_force_wipes_data() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();
        assert_eq!(store.all_resources().unwrap().len(), 1);

        store.init_db(true).unwrap();
        assert!(store.all_resources().unwrap().is_empty());
    }

    #[test]
    fn insert_and_get_resource() {
        let store = SyncStore::in_memory().unwrap();
        let resource = make_resource("res_1", "doc_1", "rg_1");
        store.insert_resource(&resource).unwrap();

        assert_eq!(store.get_resource("res_1").unwrap().unwrap(), resource);
        assert_eq!(
            store
                .get_resource_by_doc_id("doc_1", None)
                .unwrap()
                .unwrap(),
            resource
        );
        assert_eq!(
            store
                .get_resource_by_doc_id("doc_1", Some("rg_1"))
                .unwrap()
                .unwrap(),
            resource
        );
        assert!(store
            .get_resource_by_doc_id("doc_1", Some("rg_other"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn unique_live_resource_per_doc_and_group() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();

        // Second live resource for the same (doc, group) is rejected.
        assert!(store
            .insert_resource(&make_resource("res_2", "doc_1", "rg_1"))
            .is_err());

        // Same doc in a different group is fine.
        store
            .insert_resource(&make_resource("res_3", "doc_1", "rg_2"))
            .unwrap();
    }

    #[test]
    fn tombstones_do_not_block_inserts() {
        let store = SyncStore::in_memory().unwrap();
        let mut dead = make_resource("res_1", "doc_1", "rg_1");
        dead.removed = true;
        store.insert_resource(&dead).unwrap();

        store
            .insert_resource(&make_resource("res_2", "doc_1", "rg_1"))
            .unwrap();
    }

    #[test]
    fn get_by_doc_id_prefers_live_resource() {
        let store = SyncStore::in_memory().unwrap();
        let mut dead = make_resource("res_a", "doc_1", "rg_1");
        dead.removed = true;
        store.insert_resource(&dead).unwrap();
        store
            .insert_resource(&make_resource("res_b", "doc_1", "rg_1"))
            .unwrap();

        let found = store.get_resource_by_doc_id("doc_1", None).unwrap().unwrap();
        assert_eq!(found.id, "res_b");
    }

    #[test]
    fn update_resource_merges_patch() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();

        let updated = store
            .update_resource(
                "res_1",
                &ResourcePatch {
                    version: Some("ver-1".to_string()),
                    dirty: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.version, "ver-1");
        assert!(!updated.dirty);
        // Untouched fields survive.
        assert_eq!(updated.name, "Test");
        assert_eq!(updated.last_edited, 1_700_000_000_000);

        let reloaded = store.get_resource("res_1").unwrap().unwrap();
        assert_eq!(reloaded, updated);
    }

    #[test]
    fn find_dirty_resources_includes_tombstones() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();
        let mut tombstone = make_resource("res_2", "doc_2", "rg_1");
        tombstone.removed = true;
        store.insert_resource(&tombstone).unwrap();
        let mut clean = make_resource("res_3", "doc_3", "rg_1");
        clean.dirty = false;
        store.insert_resource(&clean).unwrap();

        let dirty = store.find_dirty_resources(Some("rg_1")).unwrap();
        let ids: Vec<&str> = dirty.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["res_1", "res_2"]);
    }

    #[test]
    fn all_active_excludes_tombstones() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();
        let mut tombstone = make_resource("res_2", "doc_2", "rg_1");
        tombstone.removed = true;
        store.insert_resource(&tombstone).unwrap();

        let active = store.all_active_resources(None).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "res_1");
    }

    #[test]
    fn config_create_and_patch() {
        let store = SyncStore::in_memory().unwrap();

        // Lazily created with mode unset.
        let config = store
            .create_or_update_config("rg_1", &ConfigPatch::default())
            .unwrap();
        assert_eq!(config.sync_mode, SyncMode::Unset);

        let config = store
            .create_or_update_config(
                "rg_1",
                &ConfigPatch {
                    sync_mode: Some(SyncMode::On),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(config.sync_mode, SyncMode::On);

        assert_eq!(store.all_configs().unwrap().len(), 1);
        assert!(store.find_inactive_configs().unwrap().is_empty());
    }

    #[test]
    fn inactive_configs_are_off_and_unset() {
        let store = SyncStore::in_memory().unwrap();
        for (id, mode) in [("rg_1", SyncMode::On), ("rg_2", SyncMode::Off), ("rg_3", SyncMode::Unset)] {
            store
                .create_or_update_config(
                    id,
                    &ConfigPatch {
                        sync_mode: Some(mode),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let inactive = store.find_inactive_configs().unwrap();
        let ids: Vec<&str> = inactive.iter().map(|c| c.resource_group_id.as_str()).collect();
        assert_eq!(ids, vec!["rg_2", "rg_3"]);

        let active = store.find_active_configs().unwrap();
        let ids: Vec<&str> = active.iter().map(|c| c.resource_group_id.as_str()).collect();
        assert_eq!(ids, vec!["rg_1"]);
    }

    #[test]
    fn resource_group_roundtrip_and_removal() {
        let store = SyncStore::in_memory().unwrap();
        let group = ResourceGroup {
            id: "rg_1".to_string(),
            name: "Workspace 1".to_string(),
            parent_resource_id: "wrk_1".to_string(),
            enc_symmetric_key: "deadbeef".to_string(),
        };
        store.insert_resource_group(&group).unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();
        store
            .create_or_update_config("rg_1", &ConfigPatch::default())
            .unwrap();

        assert_eq!(store.get_resource_group("rg_1").unwrap().unwrap(), group);

        store.remove_resource_group("rg_1").unwrap();
        assert!(store.get_resource_group("rg_1").unwrap().is_none());
        assert!(store.all_resources().unwrap().is_empty());
        assert!(store.all_configs().unwrap().is_empty());
    }

    #[test]
    fn reset_local_data_wipes_everything() {
        let store = SyncStore::in_memory().unwrap();
        store
            .insert_resource(&make_resource("res_1", "doc_1", "rg_1"))
            .unwrap();
        store
            .insert_resource_group(&ResourceGroup {
                id: "rg_1".to_string(),
                name: String::new(),
                parent_resource_id: "wrk_1".to_string(),
                enc_symmetric_key: String::new(),
            })
            .unwrap();
        store
            .create_or_update_config("rg_1", &ConfigPatch::default())
            .unwrap();

        store.reset_local_data().unwrap();

        assert!(store.all_resources().unwrap().is_empty());
        assert!(store.get_resource_group("rg_1").unwrap().is_none());
        assert!(store.all_configs().unwrap().is_empty());
    }
}
