//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `set_default` calls below
//! 2. **Config file**: TOML file named by the `VITE_PROXY_CONFIG` env var (default
//!    `config/config.toml`)
//! 3. **Environment variables**: `VITE_PROXY__SECTION__KEY` overrides a single field
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: bind address, concurrency cap and extra response headers
//! - [`UpstreamsConfig`]: Vite node URLs (`http(s)://` or `ws(s)://`)
//! - [`ModulesConfig`]: feature switches for the namespaces
//! - [`RateLimitsConfig`]: `global` and `vpow` budgets
//! - [`VpowConfig`], [`StorageConfig`], [`CacheConfig`], [`SubscriptionsConfig`],
//!   [`HeartbeatConfig`], [`TrustedProxiesConfig`], [`MetricsConfig`], [`LoggingConfig`]
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [server.headers]
//! Access-Control-Allow-Origin = "*"
//!
//! [upstreams]
//! nodes = ["wss://node.vite.net/gvite/ws", "https://node.vite.net/gvite"]
//!
//! [modules]
//! vpow = true
//!
//! [rate_limits.global]
//! max = 500
//! window = "1m"
//!
//! [vpow]
//! api_key = "00000000000000000000000000000000000000000000000000000000000000aa"
//! ```

use crate::middleware::rate_limiting::Limit;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};

/// HTTP and WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Must be greater than 0.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Headers added to every HTTP response.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_concurrent_requests() -> usize {
    1000
}

/// Vite RPC nodes.
///
/// The first WebSocket node becomes the subscription node; without one, subscriptions fall back
/// to HTTP filter polling against the first node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Drop nodes whose `net_syncInfo` state is not 2 at startup.
    #[serde(default = "default_true")]
    pub sync_check: bool,
}

fn default_nodes() -> Vec<String> {
    vec!["wss://node.vite.net/gvite/ws".to_string()]
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Feature switches. The `subscribe` namespace is always on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default)]
    pub vpow: bool,
    #[serde(default)]
    pub wallet: bool,
    #[serde(default = "default_true")]
    pub caching: bool,
    #[serde(default = "default_true")]
    pub rate_limits: bool,
    #[serde(default = "default_true")]
    pub heartbeat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_global_limit")]
    pub global: Limit,
    #[serde(default = "default_vpow_limit")]
    pub vpow: Limit,
}

fn default_global_limit() -> Limit {
    Limit::new(500, Duration::from_secs(60))
}

fn default_vpow_limit() -> Limit {
    Limit::new(50, Duration::from_secs(3600))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpowConfig {
    /// 64 hex characters; required when the vpow module is enabled.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_vpow_endpoint")]
    pub endpoint: String,
}

fn default_vpow_endpoint() -> String {
    "https://pow.vitamin.tips".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_rate_limit_database_url")]
    pub rate_limit_database_url: String,

    #[serde(default = "default_wallet_database_url")]
    pub wallet_database_url: String,
}

fn default_rate_limit_database_url() -> String {
    "sqlite://rate_limits.db".to_string()
}

fn default_wallet_database_url() -> String {
    "sqlite://wallets.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_snapshot_block_ttl_ms")]
    pub snapshot_block_ttl_ms: u64,
}

fn default_snapshot_block_ttl_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// A poll filter not polled within this many seconds is torn down.
    #[serde(default = "default_filter_deadline_seconds")]
    pub filter_deadline_seconds: u64,
}

fn default_filter_deadline_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_heartbeat_timeout_seconds() -> u64 {
    45
}

/// Reverse proxies whose `X-Forwarded-For` entry is skipped when resolving the client address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedProxiesConfig {
    /// Fetch the Cloudflare ranges at startup.
    #[serde(default = "default_true")]
    pub fetch_cloudflare: bool,

    #[serde(default)]
    pub extra_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus text at `GET /metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub vpow: VpowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            request_timeout_seconds: default_request_timeout_seconds(),
            sync_check: true,
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self { vpow: false, wallet: false, caching: true, rate_limits: true, heartbeat: true }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self { global: default_global_limit(), vpow: default_vpow_limit() }
    }
}

impl Default for VpowConfig {
    fn default() -> Self {
        Self { api_key: String::new(), endpoint: default_vpow_endpoint() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rate_limit_database_url: default_rate_limit_database_url(),
            wallet_database_url: default_wallet_database_url(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { snapshot_block_ttl_ms: default_snapshot_block_ttl_ms() }
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self { filter_deadline_seconds: default_filter_deadline_seconds() }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { timeout_seconds: default_heartbeat_timeout_seconds() }
    }
}

impl Default for TrustedProxiesConfig {
    fn default() -> Self {
        Self { fetch_cloudflare: true, extra_cidrs: Vec::new() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `VITE_PROXY__` prefix can override any configuration
    /// value. Use `__` as a separator for nested fields (e.g., `VITE_PROXY__SERVER__PORT=9000`).
    /// `VITE_PROXY__UPSTREAMS__NODES` takes a comma-separated list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("VITE_PROXY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upstreams.nodes")
                    .with_list_parse_key("trusted_proxies.extra_cidrs")
                    .try_parsing(true),
            )
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `VITE_PROXY_CONFIG` environment
    /// variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("VITE_PROXY_CONFIG")
            .unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the listener.
    ///
    /// # Errors
    ///
    /// Returns an error string if `host:port` is not a valid [`SocketAddr`].
    ///
    /// [`SocketAddr`]: std::net::SocketAddr
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| format!("Invalid socket address: {}:{}", self.server.host, self.server.port))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstreams.request_timeout_seconds)
    }

    #[must_use]
    pub fn snapshot_block_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.snapshot_block_ttl_ms)
    }

    #[must_use]
    pub fn filter_deadline(&self) -> Duration {
        Duration::from_secs(self.subscriptions.filter_deadline_seconds)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat.timeout_seconds)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least one node is configured and every node is an `http(s)`/`ws(s)` URL
    /// - The vpow API key is 64 hex characters when the vpow module is enabled
    /// - Port, limits, TTLs and deadlines are greater than zero
    /// - Header names and values are valid HTTP header material
    /// - Extra trusted CIDRs parse
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstreams.nodes.is_empty() {
            return Err("upstreams.nodes must not be empty".to_string());
        }

        for node in &self.upstreams.nodes {
            let url = url::Url::parse(node)
                .map_err(|e| format!("upstreams.nodes contains an invalid URL {node}: {e}"))?;
            if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
                return Err(format!("Unsupported node URL scheme for {node}"));
            }
        }

        if self.upstreams.request_timeout_seconds == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }

        if self.modules.vpow {
            let key = &self.vpow.api_key;
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(
                    "vpow.api_key must be a 64-character hex string (required by vpow module)"
                        .to_string(),
                );
            }
            url::Url::parse(&self.vpow.endpoint)
                .map_err(|e| format!("Invalid vpow endpoint {}: {e}", self.vpow.endpoint))?;
        }

        if self.modules.rate_limits {
            for (name, limit) in [("global", &self.rate_limits.global), ("vpow", &self.rate_limits.vpow)]
            {
                if limit.max == 0 || limit.window.is_zero() {
                    return Err(format!("rate_limits.{name} needs max > 0 and a non-zero window"));
                }
            }
        }

        if self.server.port == 0 {
            return Err("Port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        for (name, value) in &self.server.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("Invalid header name: {name}"))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|_| format!("Invalid value for header {name}"))?;
        }

        if self.cache.snapshot_block_ttl_ms == 0 {
            return Err("Snapshot block TTL must be greater than 0".to_string());
        }

        if self.subscriptions.filter_deadline_seconds == 0 {
            return Err("Filter deadline must be greater than 0".to_string());
        }

        if self.heartbeat.timeout_seconds == 0 {
            return Err("Heartbeat timeout must be greater than 0".to_string());
        }

        for cidr in &self.trusted_proxies.extra_cidrs {
            cidr.parse::<ipnetwork::IpNetwork>()
                .map_err(|e| format!("Invalid trusted proxy CIDR {cidr}: {e}"))?;
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
