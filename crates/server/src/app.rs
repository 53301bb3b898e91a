//! Axum application assembly.

use axum::{
    http::{HeaderName, HeaderValue},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use vite_proxy_core::{
    config::AppConfig, metrics::MetricsCollector, proxy::MethodRouter, runtime::ViteProxyRuntime,
    utils::TrustedProxies,
};

use crate::{middleware, router, websocket};

/// Request bodies above this size are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid response header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid value for response header {0}")]
    InvalidHeaderValue(String),
}

/// State shared by every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MethodRouter>,
    pub metrics: Arc<MetricsCollector>,
    pub trusted_proxies: Arc<TrustedProxies>,
}

impl AppState {
    #[must_use]
    pub fn from_runtime(runtime: &ViteProxyRuntime) -> Self {
        Self {
            router: Arc::clone(runtime.router()),
            metrics: Arc::clone(runtime.metrics_collector()),
            trusted_proxies: Arc::clone(runtime.trusted_proxies()),
        }
    }
}

/// Builds the public router.
///
/// JSON-RPC is accepted by POST on any path and WebSocket upgrades by GET on any path.
/// `GET /metrics` serves Prometheus text when `metrics.enabled` is set. The configured
/// `server.headers` are added to every response.
///
/// # Errors
///
/// Returns [`ServerError`] if a configured header name or value is not valid HTTP.
pub fn create_app(state: AppState, config: &AppConfig) -> Result<Router, ServerError> {
    let mut rpc = Router::new()
        .route("/", post(router::handle_rpc).get(websocket::handle_upgrade))
        .route("/{*path}", post(router::handle_rpc).get(websocket::handle_upgrade));

    if config.metrics.enabled {
        rpc = rpc.route("/metrics", get(router::handle_metrics).post(router::handle_rpc));
    }

    let mut app = rpc
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state.trusted_proxies),
            middleware::client_ip_middleware,
        ))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state);

    for (name, value) in &config.server.headers {
        let header_name = HeaderName::try_from(name.as_str())
            .map_err(|_| ServerError::InvalidHeaderName(name.clone()))?;
        let header_value = HeaderValue::try_from(value.as_str())
            .map_err(|_| ServerError::InvalidHeaderValue(name.clone()))?;
        app = app.layer(SetResponseHeaderLayer::overriding(header_name, header_value));
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}
