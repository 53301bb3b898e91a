//! Builder for initializing the proxy runtime from an [`AppConfig`].

use crate::{
    cache::ResponseCache,
    chain::{ChainState, EventBus},
    config::AppConfig,
    metrics::MetricsCollector,
    middleware::rate_limiting::RateLimiter,
    pow::PowClient,
    proxy::{
        handlers::{HeartbeatHandler, LedgerHandler, SubscribeHandler, VpowHandler, WalletHandler},
        MethodRouter, NamespaceHandlers, SharedContext,
    },
    storage::{PersistentCounterStore, SqliteWalletStore, StoreError},
    subscription::SubscriptionHub,
    upstream::{ChainFeed, NodePool, UpstreamError, UpstreamNode},
    utils::TrustedProxies,
    wallet::WalletService,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{lifecycle::ViteProxyRuntime, ViteProxyComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// No node could be reached or none is synced.
    #[error("Upstream initialization failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Storage initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_chain_feed: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_chain_feed: true, shutdown_channel_capacity: 16 }
    }
}

/// Builder for a [`ViteProxyRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use vite_proxy_core::{config::AppConfig, runtime::ViteProxyRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = ViteProxyRuntimeBuilder::new().with_config(config).build().await?;
/// let router = runtime.router();
/// # Ok(())
/// # }
/// ```
pub struct ViteProxyRuntimeBuilder {
    config: Option<AppConfig>,
    nodes: Option<Vec<Arc<dyn UpstreamNode>>>,
    options: RuntimeOptions,
}

impl ViteProxyRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, nodes: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses these nodes as they are instead of connecting to `upstreams.nodes`. No sync check
    /// is run on them.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<Arc<dyn UpstreamNode>>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Skips the chain feed; chain events then only arrive through the event bus.
    #[must_use]
    pub fn disable_chain_feed(mut self) -> Self {
        self.options.enable_chain_feed = false;
        self
    }

    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the runtime and starts its background tasks.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if the configuration is missing or invalid, no node is usable,
    /// or a store cannot be opened.
    pub async fn build(self) -> Result<ViteProxyRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            nodes = config.upstreams.nodes.len(),
            vpow = config.modules.vpow,
            wallet = config.modules.wallet,
            caching = config.modules.caching,
            rate_limits = config.modules.rate_limits,
            heartbeat = config.modules.heartbeat,
            "Initializing vite-proxy runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let metrics_collector = Arc::new(MetricsCollector::new());

        let pool = match self.nodes {
            Some(nodes) => NodePool::new(nodes)?,
            None => NodePool::connect(&config.upstreams).await?,
        };
        let pool = Arc::new(pool.with_metrics(Arc::clone(&metrics_collector)));
        info!(nodes = pool.len(), subscription_node = %pool.subscription_node().url(), "Node pool ready");

        let chain_state = Arc::new(ChainState::new());
        let bus = EventBus::new();

        let limiter = if config.modules.rate_limits {
            let store = PersistentCounterStore::open(&config.storage.rate_limit_database_url).await?;
            let limiter = Arc::new(
                RateLimiter::new(Arc::new(store)).with_metrics(Arc::clone(&metrics_collector)),
            );
            let restored = limiter.restore().await;
            info!(restored, "Rate limiter initialized");
            Some(limiter)
        } else {
            debug!("Rate limits disabled");
            None
        };

        let ctx = Arc::new(SharedContext {
            pool: Arc::clone(&pool),
            limiter: limiter.clone(),
            global_limit: config.rate_limits.global,
            metrics: Arc::clone(&metrics_collector),
        });

        let hub = Arc::new(
            SubscriptionHub::new(bus.clone(), Arc::clone(&pool))
                .with_filter_deadline(config.filter_deadline())
                .with_metrics(Arc::clone(&metrics_collector)),
        );

        let (ledger, cache) = if config.modules.caching {
            let cache = Arc::new(ResponseCache::with_metrics(
                config.snapshot_block_ttl(),
                Arc::clone(&metrics_collector),
            ));
            let ledger = LedgerHandler::new(Arc::clone(&ctx), Arc::clone(&cache), Arc::clone(&chain_state));
            tasks.push(ledger.start(&bus, &shutdown_tx));
            (Some(ledger), Some(cache))
        } else {
            (None, None)
        };

        let vpow = if config.modules.vpow {
            let client = PowClient::new(&config.vpow.endpoint, config.request_timeout())
                .map_err(|e| RuntimeError::Initialization(format!("PoW client: {e}")))?;
            Some(VpowHandler::new(
                Arc::clone(&ctx),
                client,
                config.vpow.api_key.clone(),
                config.rate_limits.vpow,
            ))
        } else {
            None
        };

        let wallets = if config.modules.wallet {
            let store = SqliteWalletStore::open(&config.storage.wallet_database_url).await?;
            debug!("Wallet store opened");
            Some(Arc::new(WalletService::new(Arc::new(store))))
        } else {
            None
        };

        let heartbeat = config.modules.heartbeat.then(|| HeartbeatHandler::new(config.heartbeat_timeout()));

        let router = Arc::new(MethodRouter::new(
            Arc::clone(&ctx),
            NamespaceHandlers {
                subscribe: SubscribeHandler::new(Arc::clone(&hub)),
                vpow,
                wallet: wallets.as_ref().map(|wallets| WalletHandler::new(Arc::clone(wallets))),
                ledger,
                heartbeat,
            },
        ));

        let trusted_proxies = Arc::new(TrustedProxies::from_cidrs(&config.trusted_proxies.extra_cidrs));
        if config.trusted_proxies.fetch_cloudflare {
            tasks.push(spawn_trusted_proxy_refresh(Arc::clone(&trusted_proxies)));
        }

        if self.options.enable_chain_feed {
            tasks.extend(ChainFeed::new(Arc::clone(&pool), bus.clone()).start(&shutdown_tx));
            debug!("Chain feed started");
        }

        let components = ViteProxyComponents {
            metrics_collector,
            pool,
            chain_state,
            bus,
            hub,
            cache,
            limiter,
            wallets,
            trusted_proxies,
            router,
        };

        info!("vite-proxy runtime initialization complete");
        Ok(ViteProxyRuntime::new(components, shutdown_tx, config, tasks))
    }
}

impl Default for ViteProxyRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_trusted_proxy_refresh(trusted: Arc<TrustedProxies>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().use_rustls_tls().build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "cannot build HTTP client for trusted proxy ranges");
                return;
            }
        };
        if let Err(e) = trusted.refresh_cloudflare(&client).await {
            warn!(error = %e, "failed to fetch Cloudflare ranges, using configured CIDRs only");
        }
    })
}
