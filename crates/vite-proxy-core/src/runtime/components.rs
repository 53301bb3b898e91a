//! Component container for the proxy runtime.

use crate::{
    cache::ResponseCache,
    chain::{ChainState, EventBus},
    metrics::MetricsCollector,
    middleware::rate_limiting::RateLimiter,
    proxy::MethodRouter,
    subscription::SubscriptionHub,
    upstream::NodePool,
    utils::TrustedProxies,
    wallet::WalletService,
};
use std::sync::Arc;

/// Everything the builder initialized, shared by `Arc`.
///
/// Optional members are `None` when their module is disabled.
#[derive(Clone)]
pub struct ViteProxyComponents {
    pub(super) metrics_collector: Arc<MetricsCollector>,
    pub(super) pool: Arc<NodePool>,
    pub(super) chain_state: Arc<ChainState>,
    pub(super) bus: EventBus,
    pub(super) hub: Arc<SubscriptionHub>,
    pub(super) cache: Option<Arc<ResponseCache>>,
    pub(super) limiter: Option<Arc<RateLimiter>>,
    pub(super) wallets: Option<Arc<WalletService>>,
    pub(super) trusted_proxies: Arc<TrustedProxies>,
    pub(super) router: Arc<MethodRouter>,
}

impl ViteProxyComponents {
    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics_collector
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    #[must_use]
    pub fn chain_state(&self) -> &Arc<ChainState> {
        &self.chain_state
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn subscription_hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Snapshot block cache, if the caching module is enabled.
    #[must_use]
    pub fn response_cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// Rate limiter, if the `rate_limits` module is enabled.
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn wallet_service(&self) -> Option<&Arc<WalletService>> {
        self.wallets.as_ref()
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &Arc<TrustedProxies> {
        &self.trusted_proxies
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MethodRouter> {
        &self.router
    }
}
