use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Instant};

use crate::{
    metrics::MetricsCollector,
    middleware::{
        rate_limiting::{Limit, RateLimiter},
        validation::response_id,
    },
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::NodePool,
};

use super::{
    connection::ClientConnection,
    errors::ProxyError,
    handlers::{HeartbeatHandler, LedgerHandler, SubscribeHandler, VpowHandler, WalletHandler},
};

/// Rate-limit namespace charged for every request except heartbeats.
pub const GLOBAL_LIMIT: &str = "global";

/// Namespace whose calls never count against the global limit.
const UNLIMITED_NAMESPACE: &str = "heartbeat";

/// Shared context for all namespace handlers.
///
/// Handlers hold one `Arc<SharedContext>` instead of separate references to the pool, the
/// limiter and the metrics collector.
#[derive(Clone)]
pub struct SharedContext {
    pub pool: Arc<NodePool>,
    /// `None` when the `rate_limits` module is disabled.
    pub limiter: Option<Arc<RateLimiter>>,
    pub global_limit: Limit,
    pub metrics: Arc<MetricsCollector>,
}

impl SharedContext {
    /// Forwards a request verbatim to a random node.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Upstream`; node-side JSON-RPC errors keep their code and message.
    pub async fn forward_to_upstream(&self, request: &JsonRpcRequest) -> Result<Value, ProxyError> {
        Ok(self.pool.forward(&request.method, request.params.clone()).await?)
    }

    /// Charges one call against `limit` when limits are enabled and the client is known.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::RateLimited` when the budget is spent.
    pub async fn consume(
        &self,
        namespace: &str,
        client_key: Option<&str>,
        limit: Limit,
    ) -> Result<(), ProxyError> {
        match (&self.limiter, client_key) {
            (Some(limiter), Some(client_key)) => limiter.consume(namespace, client_key, limit).await,
            _ => Ok(()),
        }
    }
}

/// Handler a registered method prefix resolves to.
#[derive(Clone)]
pub enum Namespace {
    Subscribe(Arc<SubscribeHandler>),
    Vpow(Arc<VpowHandler>),
    Wallet(Arc<WalletHandler>),
    Ledger(Arc<LedgerHandler>),
    Heartbeat(Arc<HeartbeatHandler>),
}

impl Namespace {
    /// Metrics label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Vpow(_) => "vpow",
            Self::Wallet(_) => "wallet",
            Self::Ledger(_) => "ledger",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Handlers for the enabled modules. `subscribe` is always present.
pub struct NamespaceHandlers {
    pub subscribe: SubscribeHandler,
    pub vpow: Option<VpowHandler>,
    pub wallet: Option<WalletHandler>,
    pub ledger: Option<LedgerHandler>,
    pub heartbeat: Option<HeartbeatHandler>,
}

/// Routes validated JSON-RPC requests to a namespace handler or to a random node.
///
/// Resolution tries the underscore-split method from its longest prefix to its shortest
/// against the registration table, so `util_getPoWNonce` can be claimed by the vpow handler
/// while the rest of `util_*` is forwarded.
pub struct MethodRouter {
    ctx: Arc<SharedContext>,
    routes: HashMap<&'static str, Namespace>,
}

impl MethodRouter {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>, handlers: NamespaceHandlers) -> Self {
        let mut routes = HashMap::new();
        routes.insert("subscribe", Namespace::Subscribe(Arc::new(handlers.subscribe)));

        if let Some(vpow) = handlers.vpow {
            let vpow = Arc::new(vpow);
            for prefix in ["util_getPoWNonce", "pow_getPowNonce", "vpow"] {
                routes.insert(prefix, Namespace::Vpow(Arc::clone(&vpow)));
            }
        }
        if let Some(wallet) = handlers.wallet {
            routes.insert("wallet", Namespace::Wallet(Arc::new(wallet)));
        }
        if let Some(ledger) = handlers.ledger {
            routes.insert("ledger", Namespace::Ledger(Arc::new(ledger)));
        }
        if let Some(heartbeat) = handlers.heartbeat {
            routes.insert("heartbeat", Namespace::Heartbeat(Arc::new(heartbeat)));
        }

        let mut registered: Vec<_> = routes.keys().copied().collect();
        registered.sort_unstable();
        tracing::info!(namespaces = ?registered, "method router ready");

        Self { ctx, routes }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    /// Longest registered prefix of `method`, split on `_`.
    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<&Namespace> {
        let mut prefix = method;
        loop {
            if let Some(namespace) = self.routes.get(prefix) {
                return Some(namespace);
            }
            prefix = &prefix[..prefix.rfind('_')?];
        }
    }

    /// Validates and serves one raw envelope. Never fails: errors become error responses.
    pub async fn handle_value(&self, raw: &Value, conn: &ClientConnection) -> JsonRpcResponse {
        let started = Instant::now();

        let request = match JsonRpcRequest::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                let err = ProxyError::from(e);
                tracing::debug!(error = %err, "rejected invalid request");
                self.ctx.metrics.record_request("invalid", Some(&err), elapsed_ms(started));
                return JsonRpcResponse::from_error(err.to_rpc_error(), response_id(raw));
            }
        };

        let namespace = self.resolve(&request.method);
        let label = namespace.map_or("forward", Namespace::label);
        let result = self.process_request(&request, namespace, conn).await;
        self.ctx.metrics.record_request(label, result.as_ref().err(), elapsed_ms(started));

        match result {
            Ok(value) => JsonRpcResponse::success(value, Arc::clone(&request.id)),
            Err(err) => {
                match &err {
                    ProxyError::Internal(_) | ProxyError::Store(_) => tracing::error!(
                        method = %request.method,
                        client = conn.client_key().unwrap_or("-"),
                        error = %err,
                        "request failed"
                    ),
                    _ => tracing::debug!(
                        method = %request.method,
                        client = conn.client_key().unwrap_or("-"),
                        error = %err,
                        "request failed"
                    ),
                }
                JsonRpcResponse::from_error(err.to_rpc_error(), Arc::clone(&request.id))
            }
        }
    }

    /// Serves a batch. Elements are handled concurrently and answered in order.
    pub async fn handle_batch(&self, batch: &[Value], conn: &ClientConnection) -> Vec<JsonRpcResponse> {
        futures::future::join_all(batch.iter().map(|raw| self.handle_value(raw, conn))).await
    }

    async fn process_request(
        &self,
        request: &JsonRpcRequest,
        namespace: Option<&Namespace>,
        conn: &ClientConnection,
    ) -> Result<Value, ProxyError> {
        if request.namespace() != UNLIMITED_NAMESPACE {
            self.ctx.consume(GLOBAL_LIMIT, conn.client_key(), self.ctx.global_limit).await?;
        }

        match namespace {
            Some(Namespace::Subscribe(handler)) => handler.handle(request, conn).await,
            Some(Namespace::Vpow(handler)) => handler.handle(request, conn).await,
            Some(Namespace::Wallet(handler)) => handler.handle(request).await,
            Some(Namespace::Ledger(handler)) => handler.handle(request).await,
            Some(Namespace::Heartbeat(handler)) => handler.handle(request, conn),
            None => self.ctx.forward_to_upstream(request).await,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
