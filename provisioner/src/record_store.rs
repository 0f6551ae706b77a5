//! Access to the node record store.
//!
//! The store is an HTTP service that owns node records and wallet seeds. Every
//! call carries the shared secret as a `secret` query parameter, so request
//! URLs are never logged. Replies are envelopes of the form
//! `{"<payload>": ..., "error": "..."}`.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use shared_types::{GatewayCredentials, NodeStatus, StorageNode, WalletSeed};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store request {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("record store request {path} returned {status}")]
    Status { path: String, status: u16 },
    #[error("record store reply to {path} could not be decoded: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("record store rejected {path}: {message}")]
    Rejected { path: String, message: String },
    #[error("record store reply to {path} is missing {field}")]
    MissingPayload { path: String, field: &'static str },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Nodes whose status still needs driving.
    async fn pending_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError>;

    /// Ready nodes whose activated gateway count differs from the requested one.
    async fn ready_unattached_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError>;

    async fn update_status(&self, id: Uuid, status: &NodeStatus) -> Result<(), RecordStoreError>;

    async fn update_gateways_activated(
        &self,
        id: Uuid,
        activated: u32,
    ) -> Result<(), RecordStoreError>;

    async fn save_gateway_credentials(
        &self,
        id: Uuid,
        credentials: &GatewayCredentials,
    ) -> Result<(), RecordStoreError>;

    async fn wallet_seed(&self, id: Uuid) -> Result<Option<WalletSeed>, RecordStoreError>;

    async fn create_wallet_seed(
        &self,
        id: Uuid,
        words: &str,
    ) -> Result<WalletSeed, RecordStoreError>;
}

#[derive(Deserialize)]
struct Reply<T> {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Deserialize)]
struct NodesPayload {
    #[serde(default)]
    sianodes: Option<Vec<StorageNode>>,
}

#[derive(Deserialize)]
struct NodePayload {
    #[serde(default)]
    sianode: Option<StorageNode>,
}

#[derive(Deserialize)]
struct SeedPayload {
    #[serde(default)]
    wallet_seed: Option<WalletSeed>,
}

pub struct HttpRecordStore {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl HttpRecordStore {
    pub fn new(http: reqwest::Client, base_url: &str, secret: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .query(&[("secret", &self.secret)])
    }

    fn post(&self, path: &str, body: serde_json::Value) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .query(&[("secret", &self.secret)])
            .json(&body)
    }

    /// Send, then unwrap the envelope. 404s come back as `Ok(None)`.
    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        req: RequestBuilder,
    ) -> Result<Option<T>, RecordStoreError> {
        let res = req.send().await.map_err(|source| RecordStoreError::Request {
            path: path.to_string(),
            source,
        })?;
        let status = res.status();
        let body = res.text().await.map_err(|source| RecordStoreError::Request {
            path: path.to_string(),
            source,
        })?;

        let reply = serde_json::from_str::<Reply<T>>(&body);
        if let Ok(Reply {
            error: Some(message),
            ..
        }) = &reply
        {
            if !message.is_empty() && status != reqwest::StatusCode::NOT_FOUND {
                return Err(RecordStoreError::Rejected {
                    path: path.to_string(),
                    message: message.clone(),
                });
            }
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(path, "record store has no such record");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RecordStoreError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        let reply = reply.map_err(|source| RecordStoreError::Decode {
            path: path.to_string(),
            source,
        })?;
        Ok(Some(reply.data))
    }

    async fn nodes(&self, path: &str) -> Result<Vec<StorageNode>, RecordStoreError> {
        let payload: Option<NodesPayload> = self.call(path, self.get(path)).await?;
        Ok(payload.and_then(|p| p.sianodes).unwrap_or_default())
    }

    async fn update_node(&self, id: Uuid, body: serde_json::Value) -> Result<(), RecordStoreError> {
        let path = format!("/sianodes/id/{id}");
        let payload: Option<NodePayload> = self.call(&path, self.post(&path, body)).await?;
        match payload {
            Some(NodePayload { sianode: Some(_) }) => Ok(()),
            _ => Err(RecordStoreError::MissingPayload {
                path,
                field: "sianode",
            }),
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn pending_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        self.nodes("/sianodes/pending/all").await
    }

    async fn ready_unattached_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        self.nodes("/sianodes/orphaned/ready").await
    }

    async fn update_status(&self, id: Uuid, status: &NodeStatus) -> Result<(), RecordStoreError> {
        let path = "/sianodes/status";
        let body = json!({ "id": id, "status": status.as_str() });
        let _: Option<NodePayload> = self.call(path, self.post(path, body)).await?;
        Ok(())
    }

    async fn update_gateways_activated(
        &self,
        id: Uuid,
        activated: u32,
    ) -> Result<(), RecordStoreError> {
        self.update_node(id, json!({ "minio_instances_activated": activated }))
            .await
    }

    async fn save_gateway_credentials(
        &self,
        id: Uuid,
        credentials: &GatewayCredentials,
    ) -> Result<(), RecordStoreError> {
        let body = serde_json::to_value(credentials).map_err(|source| {
            RecordStoreError::Decode {
                path: format!("/sianodes/id/{id}"),
                source,
            }
        })?;
        self.update_node(id, body).await
    }

    async fn wallet_seed(&self, id: Uuid) -> Result<Option<WalletSeed>, RecordStoreError> {
        let path = format!("/wallets/{id}/seed");
        let payload: Option<SeedPayload> = self.call(&path, self.get(&path)).await?;
        Ok(payload.and_then(|p| p.wallet_seed))
    }

    async fn create_wallet_seed(
        &self,
        id: Uuid,
        words: &str,
    ) -> Result<WalletSeed, RecordStoreError> {
        let path = format!("/wallets/{id}/seed");
        let payload: Option<SeedPayload> = self
            .call(&path, self.post(&path, json!({ "words": words })))
            .await?;
        payload
            .and_then(|p| p.wallet_seed)
            .ok_or(RecordStoreError::MissingPayload {
                path,
                field: "wallet_seed",
            })
    }
}
