use std::time::Duration;

use shared_types::{parse_fixed, Currency};

use crate::connector::NodeEndpoints;
use crate::funding::{FundingPolicy, Multiplier, RenterTerms};

/// Where and how the per-node cluster resources are laid out.
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    /// Namespace of every namespaced resource.
    pub namespace: String,
    /// Prefix of every derived resource name.
    pub prefix: String,
    pub node_image: String,
    pub gateway_image: String,
    pub nfs_image: String,
    pub node_storage_class: String,
    pub node_storage_size: String,
    pub gateway_storage_class: String,
    pub gateway_storage_size: String,
    /// Public hostname suffix for gateway ingresses.
    pub gateway_domain: String,
    /// Shared secret holding the node API password, mounted into every pod.
    pub api_secret_name: String,
    pub api_secret_key: String,
}

impl Default for ClusterLayout {
    fn default() -> Self {
        Self {
            namespace: "sia".to_string(),
            prefix: "siacdn".to_string(),
            node_image: "gcr.io/gradientzoo-1233/sia-docker:latest".to_string(),
            gateway_image: "gcr.io/gradientzoo-1233/siacdn-minio:latest".to_string(),
            nfs_image: "gcr.io/google_containers/volume-nfs:0.8".to_string(),
            node_storage_class: "fast".to_string(),
            node_storage_size: "30Gi".to_string(),
            gateway_storage_class: "standard".to_string(),
            gateway_storage_size: "100Gi".to_string(),
            gateway_domain: "siacdn.com".to_string(),
            api_secret_name: "sia-secret".to_string(),
            api_secret_key: "siaapipassword".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the admin API listens on
    pub admin_port: u16,
    /// Base URL of the record store API
    pub record_store_url: String,
    /// Shared secret passed to the record store as a query parameter
    pub record_store_secret: String,
    /// Password for the node and prime HTTP APIs
    pub node_api_password: String,
    /// Delay between scheduler polls
    pub poll_interval: Duration,
    /// Timeout applied to every outbound HTTP call
    pub http_timeout: Duration,
    /// Optional cap on concurrently reconciling nodes. `None` is unbounded.
    pub max_in_flight: Option<usize>,
    pub layout: ClusterLayout,
    pub funding: FundingPolicy,
    pub endpoints: NodeEndpoints,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let record_store_secret = std::env::var("RECORD_STORE_SECRET")
            .map_err(|_| anyhow::anyhow!("RECORD_STORE_SECRET must be set"))?;

        let layout_defaults = ClusterLayout::default();
        let layout = ClusterLayout {
            namespace: env_str("KUBE_NAMESPACE", &layout_defaults.namespace),
            prefix: env_str("RESOURCE_PREFIX", &layout_defaults.prefix),
            node_image: env_str("NODE_IMAGE", &layout_defaults.node_image),
            gateway_image: env_str("GATEWAY_IMAGE", &layout_defaults.gateway_image),
            nfs_image: env_str("NFS_IMAGE", &layout_defaults.nfs_image),
            node_storage_class: env_str("NODE_STORAGE_CLASS", &layout_defaults.node_storage_class),
            node_storage_size: env_str("NODE_STORAGE_SIZE", &layout_defaults.node_storage_size),
            gateway_storage_class: env_str(
                "GATEWAY_STORAGE_CLASS",
                &layout_defaults.gateway_storage_class,
            ),
            gateway_storage_size: env_str(
                "GATEWAY_STORAGE_SIZE",
                &layout_defaults.gateway_storage_size,
            ),
            gateway_domain: env_str("GATEWAY_DOMAIN", &layout_defaults.gateway_domain),
            api_secret_name: env_str("API_SECRET_NAME", &layout_defaults.api_secret_name),
            api_secret_key: env_str("API_SECRET_KEY", &layout_defaults.api_secret_key),
        };

        let funding_defaults = FundingPolicy::default();
        let renter_defaults = funding_defaults.renter;
        let funding = FundingPolicy {
            price_per_unit: env_coins("PRICE_PER_TB", funding_defaults.price_per_unit)?,
            term_multiple: env_multiplier("TERM_MULTIPLE", funding_defaults.term_multiple)?,
            safety_multiple: env_multiplier("SAFETY_MULTIPLE", funding_defaults.safety_multiple)?,
            sweep_min_fee: env_coins("SWEEP_MIN_FEE", funding_defaults.sweep_min_fee)?,
            renter: RenterTerms {
                hosts: env_parse("RENTER_HOSTS", renter_defaults.hosts)?,
                required_contracts: env_parse(
                    "RENTER_REQUIRED_CONTRACTS",
                    renter_defaults.required_contracts,
                )?,
                period: env_parse("RENTER_PERIOD", renter_defaults.period)?,
                renew_window: env_parse("RENTER_RENEW_WINDOW", renter_defaults.renew_window)?,
            },
        };

        let endpoint_defaults = NodeEndpoints::default();
        let endpoints = NodeEndpoints {
            api_port: env_parse("NODE_API_PORT", endpoint_defaults.api_port)?,
            prime_service: env_str("PRIME_SERVICE_NAME", &endpoint_defaults.prime_service),
            node_tunnel_addr: env_str("NODE_TUNNEL_ADDR", &endpoint_defaults.node_tunnel_addr),
            prime_tunnel_addr: env_str("PRIME_TUNNEL_ADDR", &endpoint_defaults.prime_tunnel_addr),
        };

        let max_in_flight: usize = env_parse("MAX_IN_FLIGHT", 0)?;

        Ok(Self {
            admin_port: env_parse("PROVISIONER_ADMIN_PORT", 9096)?,
            record_store_url: env_str("RECORD_STORE_URL", "http://localhost:9095"),
            record_store_secret,
            node_api_password: env_str("NODE_API_PASSWORD", ""),
            poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 500)?),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 6)?),
            max_in_flight: (max_in_flight > 0).then_some(max_in_flight),
            layout,
            funding,
            endpoints,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_coins(key: &str, default: Currency) -> anyhow::Result<Currency> {
    match std::env::var(key) {
        Ok(val) => Currency::parse_coins(&val)
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_multiplier(key: &str, default: Multiplier) -> anyhow::Result<Multiplier> {
    match std::env::var(key) {
        Ok(val) => parse_fixed(&val, Multiplier::DECIMALS)
            .map(Multiplier::from_scaled)
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
