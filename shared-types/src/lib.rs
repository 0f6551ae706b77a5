//! Shared record types
//!
//! These types are used by both:
//! - the record-store API (CRUD over node, wallet-seed and account records)
//! - the provisioner (reconciliation of cluster resources, funds and gateways)
//!
//! Serializable with serde for JSON over HTTP. Field names on the wire follow
//! the record store's JSON format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ============================================================================
// Node Status
// ============================================================================

/// Lifecycle status of a storage node.
///
/// The forward path is strictly ordered (see [`NodeStatus::FORWARD`]).
/// `Stopping` and `Stopped` form the decommission branch; `Depleted` and
/// `Error` are only ever set administratively. Statuses the provisioner does
/// not know survive a round-trip as [`NodeStatus::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    /// Record exists, nothing deployed yet.
    Created,
    /// Volume claim, service, secret and deployment have been submitted.
    Deployed,
    /// A pod for the deployment has been observed.
    Instanced,
    /// The node's own API answers consensus queries.
    Snapshotted,
    /// The chain is fully synced.
    Synchronized,
    /// The wallet has been initialized and its seed captured.
    Initialized,
    /// The wallet reports unlocked.
    Unlocked,
    /// A funding transfer has been requested from the prime account.
    Funded,
    /// The node's confirmed balance covers the desired amount.
    Confirmed,
    /// The renter allowance has been submitted.
    Configured,
    /// Enough storage contracts are active.
    Ready,
    /// Decommission requested; funds are swept and resources torn down.
    Stopping,
    /// All resources are gone.
    Stopped,
    /// The wallet has run out of funds.
    Depleted,
    /// Forced administratively after a failure.
    Error,
    Unknown(String),
}

impl NodeStatus {
    /// The forward path, in order.
    pub const FORWARD: [NodeStatus; 11] = [
        NodeStatus::Created,
        NodeStatus::Deployed,
        NodeStatus::Instanced,
        NodeStatus::Snapshotted,
        NodeStatus::Synchronized,
        NodeStatus::Initialized,
        NodeStatus::Unlocked,
        NodeStatus::Funded,
        NodeStatus::Confirmed,
        NodeStatus::Configured,
        NodeStatus::Ready,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NodeStatus::Created => "created",
            NodeStatus::Deployed => "deployed",
            NodeStatus::Instanced => "instanced",
            NodeStatus::Snapshotted => "snapshotted",
            NodeStatus::Synchronized => "synchronized",
            NodeStatus::Initialized => "initialized",
            NodeStatus::Unlocked => "unlocked",
            NodeStatus::Funded => "funded",
            NodeStatus::Confirmed => "confirmed",
            NodeStatus::Configured => "configured",
            NodeStatus::Ready => "ready",
            NodeStatus::Stopping => "stopping",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Depleted => "depleted",
            NodeStatus::Error => "error",
            NodeStatus::Unknown(raw) => raw,
        }
    }

    /// Position on the forward path, if this status is on it.
    pub fn position(&self) -> Option<usize> {
        Self::FORWARD.iter().position(|s| s == self)
    }

    /// The immediate successor on the forward path.
    pub fn next(&self) -> Option<NodeStatus> {
        let pos = self.position()?;
        Self::FORWARD.get(pos + 1).cloned()
    }

    /// Whether the node still needs driving by the lifecycle handlers.
    pub fn is_pending(&self) -> bool {
        !matches!(
            self,
            NodeStatus::Ready | NodeStatus::Stopped | NodeStatus::Depleted | NodeStatus::Error
        )
    }

    /// Transitions the provisioner itself may record: one forward step, or
    /// the end of a decommission.
    pub fn can_advance_to(&self, to: &NodeStatus) -> bool {
        match (self, to) {
            (NodeStatus::Stopping, NodeStatus::Stopped) => true,
            _ => self.next().as_ref() == Some(to),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for NodeStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "created" => NodeStatus::Created,
            "deployed" => NodeStatus::Deployed,
            "instanced" => NodeStatus::Instanced,
            "snapshotted" => NodeStatus::Snapshotted,
            "synchronized" => NodeStatus::Synchronized,
            "initialized" => NodeStatus::Initialized,
            "unlocked" => NodeStatus::Unlocked,
            "funded" => NodeStatus::Funded,
            "confirmed" => NodeStatus::Confirmed,
            "configured" => NodeStatus::Configured,
            "ready" => NodeStatus::Ready,
            "stopping" => NodeStatus::Stopping,
            "stopped" => NodeStatus::Stopped,
            "depleted" => NodeStatus::Depleted,
            "error" => NodeStatus::Error,
            _ => NodeStatus::Unknown(raw),
        }
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        status.as_str().to_string()
    }
}

// ============================================================================
// Storage Node
// ============================================================================

/// One tenant's storage node, as recorded by the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageNode {
    pub id: Uuid,

    /// Short lowercase code all cluster resource names derive from.
    pub shortcode: String,

    pub account_id: Uuid,

    /// Requested storage capacity, in terabytes.
    pub capacity: f64,

    pub status: NodeStatus,

    #[serde(rename = "minio_instances_requested", default)]
    pub gateways_requested: u32,

    #[serde(rename = "minio_instances_activated", default)]
    pub gateways_activated: u32,

    #[serde(rename = "minio_access_key", default)]
    pub gateway_access_key: String,

    #[serde(rename = "minio_secret_key", default)]
    pub gateway_secret_key: String,

    pub created_time: DateTime<Utc>,
}

impl StorageNode {
    /// A freshly requested node in the `created` status.
    pub fn new(account_id: Uuid, capacity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            shortcode: generate_shortcode(),
            account_id,
            capacity,
            status: NodeStatus::Created,
            gateways_requested: 0,
            gateways_activated: 0,
            gateway_access_key: String::new(),
            gateway_secret_key: String::new(),
            created_time: Utc::now(),
        }
    }

    /// The gateway key pair, once one has been generated.
    pub fn gateway_credentials(&self) -> Option<GatewayCredentials> {
        if self.gateway_access_key.is_empty() || self.gateway_secret_key.is_empty() {
            return None;
        }
        Some(GatewayCredentials {
            access_key: self.gateway_access_key.clone(),
            secret_key: self.gateway_secret_key.clone(),
        })
    }
}

const SHORTCODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const UPPER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const SHORTCODE_LEN: usize = 8;

fn random_string(charset: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

/// Lowercase alphanumeric, safe to embed in DNS-1123 resource names.
pub fn generate_shortcode() -> String {
    random_string(SHORTCODE_CHARSET, SHORTCODE_LEN)
}

// ============================================================================
// Gateway Credentials
// ============================================================================

/// Access/secret key pair shared by every gateway instance of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCredentials {
    #[serde(rename = "minio_access_key")]
    pub access_key: String,
    #[serde(rename = "minio_secret_key")]
    pub secret_key: String,
}

impl GatewayCredentials {
    pub const ACCESS_KEY_LEN: usize = 20;
    pub const SECRET_KEY_LEN: usize = 40;

    pub fn generate() -> Self {
        Self {
            access_key: random_string(UPPER_CHARSET, Self::ACCESS_KEY_LEN),
            secret_key: random_string(UPPER_CHARSET, Self::SECRET_KEY_LEN),
        }
    }
}

// ============================================================================
// Wallet Seed
// ============================================================================

/// Recovery phrase of a node's wallet. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSeed {
    #[serde(rename = "sianode_id")]
    pub node_id: Uuid,
    pub words: String,
    pub created_time: DateTime<Utc>,
}

impl WalletSeed {
    pub fn new(node_id: Uuid, words: impl Into<String>) -> Self {
        Self {
            node_id,
            words: words.into(),
            created_time: Utc::now(),
        }
    }
}

// ============================================================================
// Currency
// ============================================================================

/// Number of decimal places between a coin and its base unit.
pub const COIN_DECIMALS: u32 = 24;

/// An exact amount of native currency, in base units.
///
/// On the wire this is a decimal string of base units, which is what the
/// storage daemon's API produces and accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency(u128);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyParseError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount '{0}' has more than {1} decimal places")]
    TooPrecise(String, u32),
    #[error("amount '{0}' overflows")]
    Overflow(String),
}

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub fn from_coins(coins: u64) -> Self {
        Self(coins as u128 * 10u128.pow(COIN_DECIMALS))
    }

    /// Parse a decimal coin amount ("210.39") without going through floats.
    pub fn parse_coins(input: &str) -> Result<Self, CurrencyParseError> {
        parse_fixed(input, COIN_DECIMALS).map(Self)
    }

    pub const fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Currency) -> Currency {
        Currency(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Currency) -> Currency {
        Currency(self.0.saturating_sub(other.0))
    }

    /// `self * numerator / denominator`, truncating. `None` on overflow or a
    /// zero denominator.
    pub fn checked_mul_ratio(self, numerator: u128, denominator: u128) -> Option<Currency> {
        self.0
            .checked_mul(numerator)?
            .checked_div(denominator)
            .map(Currency)
    }
}

/// Parse a non-negative decimal string into an integer scaled by
/// `10^decimals`.
pub fn parse_fixed(input: &str, decimals: u32) -> Result<u128, CurrencyParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CurrencyParseError::Empty);
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(CurrencyParseError::Invalid(trimmed.to_string()));
    }
    if frac.len() > decimals as usize {
        return Err(CurrencyParseError::TooPrecise(trimmed.to_string(), decimals));
    }

    let overflow = || CurrencyParseError::Overflow(trimmed.to_string());
    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        frac.parse().map_err(|_| overflow())?
    };
    let frac_scale = 10u128.pow(decimals - frac.len() as u32);

    whole_value
        .checked_mul(10u128.pow(decimals))
        .and_then(|w| w.checked_add(frac_value * frac_scale))
        .ok_or_else(overflow)
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    /// Parses base units, matching [`fmt::Display`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CurrencyParseError::Empty);
        }
        s.parse::<u128>()
            .map(Currency)
            .map_err(|_| CurrencyParseError::Invalid(s.to_string()))
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(d)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Currency(n as u128)),
        }
    }
}
