//! Sync metadata models: resources, resource groups, and per-group config.

use serde::{Deserialize, Serialize};

/// Version sentinel for resources the relay has not acknowledged yet.
pub const NO_VERSION: &str = "__NO_VERSION__";

/// Per-group sync preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    On,
    Off,
    Unset,
}

impl SyncMode {
    /// Convert sync mode to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Unset => "unset",
        }
    }

    /// Parse a sync mode from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "on" => Self::On,
            "off" => Self::Off,
            _ => Self::Unset,
        }
    }
}

/// The encrypted, versioned representation of one local document.
///
/// `id` is stable across the resource's lifetime; it equals the document
/// id at creation but is independent of it afterwards, since the document
/// id itself lives inside the encrypted content. Tombstones (`removed`)
/// are kept so deletions propagate and the resource can later be revived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub document_id: String,
    pub document_type: String,
    pub resource_group_id: String,
    pub version: String,
    pub name: String,
    pub created_by: String,
    /// Epoch millis; the authoritative stamp for conflict tie-breaks.
    pub last_edited: i64,
    pub last_edited_by: String,
    /// JSON-serialized AES-GCM envelope of the serialized document.
    pub enc_content: String,
    /// Local changes not yet acknowledged by the relay.
    pub dirty: bool,
    /// Tombstone flag.
    pub removed: bool,
}

/// Field-merge patch for [`Resource`]. `None` leaves the field untouched.
///
/// The store applies patches verbatim; dirty/version policy belongs to
/// the callers.
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub version: Option<String>,
    pub name: Option<String>,
    pub last_edited: Option<i64>,
    pub last_edited_by: Option<String>,
    pub enc_content: Option<String>,
    pub dirty: Option<bool>,
    pub removed: Option<bool>,
}

/// A sharing scope: one symmetric key per group, one group per
/// synchronized root document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    /// Id of the root document this group was created for.
    pub parent_resource_id: String,
    /// The group's AES key JWK, RSA-wrapped with the account public key.
    pub enc_symmetric_key: String,
}

/// Per-(account, resource group) sync preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub resource_group_id: String,
    pub sync_mode: SyncMode,
    /// Skip cookie jar resources for this group during push/pull apply.
    pub exclude_cookie_jars: bool,
    /// Skip client certificate resources for this group during push/pull apply.
    pub exclude_client_certificates: bool,
}

impl Config {
    /// A fresh config for a newly discovered group.
    pub fn new_unset(resource_group_id: &str) -> Self {
        Self {
            resource_group_id: resource_group_id.to_string(),
            sync_mode: SyncMode::Unset,
            exclude_cookie_jars: false,
            exclude_client_certificates: false,
        }
    }
}

/// Field-merge patch for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub sync_mode: Option<SyncMode>,
    pub exclude_cookie_jars: Option<bool>,
    pub exclude_client_certificates: Option<bool>,
}
