//! Relay protocol: wire types and the transport client.
//!
//! The relay stores opaque encrypted resources and arbitrates versions.
//! [`RelayClient`] is the seam the engine talks through; [`HttpRelayClient`]
//! is the production implementation. Test suites substitute their own.

use crate::store::{Resource, ResourceGroup};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A resource as transmitted to and from the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResource {
    pub id: String,
    pub resource_group_id: String,
    pub version: String,
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub enc_content: String,
    /// Epoch millis. Zero when the relay record carries no edit stamp.
    #[serde(default)]
    pub last_edited: i64,
    #[serde(default)]
    pub removed: bool,
}

impl From<&Resource> for WireResource {
    fn from(r: &Resource) -> Self {
        Self {
            id: r.id.clone(),
            resource_group_id: r.resource_group_id.clone(),
            version: r.version.clone(),
            document_type: r.document_type.clone(),
            enc_content: r.enc_content.clone(),
            last_edited: r.last_edited,
            removed: r.removed,
        }
    }
}

/// Server version assignment for one accepted resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionAck {
    pub id: String,
    pub version: String,
}

/// Relay response to a push. The four sets are disjoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub created: Vec<VersionAck>,
    #[serde(default)]
    pub updated: Vec<VersionAck>,
    #[serde(default)]
    pub removed: Vec<VersionAck>,
    /// Resources whose submitted version did not match the relay's
    /// current version; each entry carries the relay's current record.
    #[serde(default)]
    pub conflicts: Vec<WireResource>,
}

/// What the client knows about one resource, sent with a pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStub {
    pub id: String,
    pub resource_group_id: String,
    pub version: String,
    pub removed: bool,
}

impl From<&Resource> for ResourceStub {
    fn from(r: &Resource) -> Self {
        Self {
            id: r.id.clone(),
            resource_group_id: r.resource_group_id.clone(),
            version: r.version.clone(),
            removed: r.removed,
        }
    }
}

/// Pull request: the client's known state acts as the cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Restrict the pull to one group; `None` pulls everything sharable.
    pub resource_group_id: Option<String>,
    pub resources: Vec<ResourceStub>,
    /// Groups the client does not want pulled (inactive configs).
    pub blacklist: Vec<String>,
}

/// Relay response to a pull.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub updated_resources: Vec<WireResource>,
    #[serde(default)]
    pub created_resources: Vec<WireResource>,
    /// Resources the relay believes are stale locally; trigger a push.
    #[serde(default)]
    pub ids_to_push: Vec<String>,
    /// Resources the client should no longer have.
    #[serde(default)]
    pub ids_to_remove: Vec<String>,
}

/// Transport seam to the relay.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Submit an ordered batch of resources; root resources come first.
    async fn sync_push(&self, resources: Vec<WireResource>) -> Result<PushResponse>;

    /// Fetch remote changes relative to the client's known state.
    async fn sync_pull(&self, query: PullQuery) -> Result<PullResponse>;

    /// Register a new resource group. `enc_symmetric_key` is the group's
    /// AES key JWK, already wrapped with the account public key; the
    /// relay never sees key material.
    async fn sync_create_resource_group(
        &self,
        parent_resource_id: &str,
        name: &str,
        enc_symmetric_key: &str,
    ) -> Result<ResourceGroup>;

    /// Fetch a resource group. Unknown groups fail with
    /// [`SyncError::NotFound`], which is propagated, never retried.
    async fn sync_get_resource_group(&self, id: &str) -> Result<ResourceGroup>;
}

/// HTTP implementation of [`RelayClient`].
pub struct HttpRelayClient {
    client: reqwest::Client,
    relay_url: String,
    token: String,
}

impl HttpRelayClient {
    /// Create a client for the given relay URL and session token.
    pub fn new(relay_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            client,
            relay_url: relay_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.relay_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Self::decode(path, resp).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.relay_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Self::decode(path, resp).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T> {
        let status = resp.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(SyncError::Network(format!(
                "Relay error {} on {}: {}",
                status, path, body
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Network(format!("Invalid relay response on {}: {}", path, e)))
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn sync_push(&self, resources: Vec<WireResource>) -> Result<PushResponse> {
        self.post_json("/api/v1/sync/push", &resources).await
    }

    async fn sync_pull(&self, query: PullQuery) -> Result<PullResponse> {
        self.post_json("/api/v1/sync/pull", &query).await
    }

    async fn sync_create_resource_group(
        &self,
        parent_resource_id: &str,
        name: &str,
        enc_symmetric_key: &str,
    ) -> Result<ResourceGroup> {
        let body = serde_json::json!({
            "parentResourceId": parent_resource_id,
            "name": name,
            "encSymmetricKey": enc_symmetric_key,
        });
        self.post_json("/api/v1/sync/resource-groups", &body).await
    }

    async fn sync_get_resource_group(&self, id: &str) -> Result<ResourceGroup> {
        self.get_json(&format!("/api/v1/sync/resource-groups/{}", id))
            .await
    }
}
