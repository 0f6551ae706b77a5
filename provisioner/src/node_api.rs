//! Client for a storage node's HTTP API.
//!
//! Every call authenticates with HTTP basic auth (empty user, the shared API
//! password) and identifies itself with the `Sia-Agent` user agent the node
//! requires. Writes are form-encoded; replies are JSON or empty.

use async_trait::async_trait;
use reqwest::{header::USER_AGENT, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use shared_types::Currency;
use tracing::debug;

const AGENT: &str = "Sia-Agent";

#[derive(Debug, thiserror::Error)]
pub enum NodeApiError {
    #[error("node request {path} failed: {source}")]
    Request {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("node request {path} returned {status}: {message}")]
    Status {
        path: &'static str,
        status: u16,
        message: String,
    },
    #[error("node reply to {path} could not be decoded: {source}")]
    Decode {
        path: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConsensusInfo {
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(rename = "confirmedsiacoinbalance", default)]
    pub confirmed_balance: Currency,
    #[serde(rename = "unconfirmedincomingsiacoins", default)]
    pub unconfirmed_incoming: Currency,
    #[serde(rename = "unconfirmedoutgoingsiacoins", default)]
    pub unconfirmed_outgoing: Currency,
}

/// Renter allowance settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub funds: Currency,
    pub hosts: u32,
    pub period: u64,
    pub renew_window: u64,
}

#[derive(Deserialize)]
struct InitReply {
    #[serde(rename = "primaryseed")]
    primary_seed: String,
}

#[derive(Deserialize)]
struct AddressReply {
    address: String,
}

#[derive(Deserialize)]
struct SendReply {
    #[serde(rename = "transactionids", default)]
    transaction_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ContractsReply {
    #[serde(default)]
    contracts: Option<Vec<serde_json::Value>>,
    #[serde(rename = "activecontracts", default)]
    active_contracts: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct ErrorReply {
    message: String,
}

/// The node operations the reconciler relies on.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn consensus(&self) -> Result<ConsensusInfo, NodeApiError>;

    async fn wallet(&self) -> Result<WalletInfo, NodeApiError>;

    /// Create a fresh wallet and return its seed words as reported.
    async fn init_wallet(&self) -> Result<String, NodeApiError>;

    async fn init_wallet_from_seed(&self, seed: &str) -> Result<(), NodeApiError>;

    /// A fresh receive address.
    async fn wallet_address(&self) -> Result<String, NodeApiError>;

    /// Returns the ids of the submitted transactions.
    async fn send_coins(
        &self,
        amount: Currency,
        destination: &str,
    ) -> Result<Vec<String>, NodeApiError>;

    async fn set_allowance(&self, allowance: &Allowance) -> Result<(), NodeApiError>;

    async fn active_contracts(&self) -> Result<usize, NodeApiError>;
}

pub struct HttpNodeClient {
    http: reqwest::Client,
    base_url: String,
    password: String,
}

impl HttpNodeClient {
    /// `address` is `host:port`.
    pub fn new(http: reqwest::Client, address: &str, password: &str) -> Self {
        Self {
            http,
            base_url: format!("http://{address}"),
            password: password.to_string(),
        }
    }

    async fn send(&self, path: &'static str, req: RequestBuilder) -> Result<String, NodeApiError> {
        let res = req
            .header(USER_AGENT, AGENT)
            .basic_auth("", Some(&self.password))
            .send()
            .await
            .map_err(|source| NodeApiError::Request { path, source })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| NodeApiError::Request { path, source })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorReply>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(NodeApiError::Status {
                path,
                status: status.as_u16(),
                message,
            });
        }
        debug!(base = %self.base_url, path, "node request ok");
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, NodeApiError> {
        let req = self.http.get(format!("{}{path}", self.base_url));
        let body = self.send(path, req).await?;
        decode(path, &body)
    }

    async fn post(
        &self,
        path: &'static str,
        form: &[(&str, String)],
    ) -> Result<String, NodeApiError> {
        let req = self.http.post(format!("{}{path}", self.base_url)).form(form);
        self.send(path, req).await
    }
}

fn decode<T: DeserializeOwned>(path: &'static str, body: &str) -> Result<T, NodeApiError> {
    serde_json::from_str(body).map_err(|source| NodeApiError::Decode { path, source })
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn consensus(&self) -> Result<ConsensusInfo, NodeApiError> {
        self.get("/consensus").await
    }

    async fn wallet(&self) -> Result<WalletInfo, NodeApiError> {
        self.get("/wallet").await
    }

    async fn init_wallet(&self) -> Result<String, NodeApiError> {
        let body = self.post("/wallet/init", &[]).await?;
        let reply: InitReply = decode("/wallet/init", &body)?;
        Ok(reply.primary_seed)
    }

    async fn init_wallet_from_seed(&self, seed: &str) -> Result<(), NodeApiError> {
        self.post("/wallet/init/seed", &[("seed", seed.to_string())])
            .await
            .map(|_| ())
    }

    async fn wallet_address(&self) -> Result<String, NodeApiError> {
        let reply: AddressReply = self.get("/wallet/address").await?;
        Ok(reply.address)
    }

    async fn send_coins(
        &self,
        amount: Currency,
        destination: &str,
    ) -> Result<Vec<String>, NodeApiError> {
        let body = self
            .post(
                "/wallet/siacoins",
                &[
                    ("amount", amount.to_string()),
                    ("destination", destination.to_string()),
                ],
            )
            .await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let reply: SendReply = decode("/wallet/siacoins", &body)?;
        Ok(reply.transaction_ids)
    }

    async fn set_allowance(&self, allowance: &Allowance) -> Result<(), NodeApiError> {
        self.post(
            "/renter",
            &[
                ("funds", allowance.funds.to_string()),
                ("hosts", allowance.hosts.to_string()),
                ("period", allowance.period.to_string()),
                ("renewwindow", allowance.renew_window.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn active_contracts(&self) -> Result<usize, NodeApiError> {
        let reply: ContractsReply = self.get("/renter/contracts").await?;
        Ok(reply
            .active_contracts
            .or(reply.contracts)
            .map_or(0, |c| c.len()))
    }
}
