//! # Metrics
//!
//! Prometheus counters, gauges and histograms recorded through the `metrics` facade and
//! rendered by a process-wide `PrometheusHandle` at `GET /metrics`.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `vite_proxy_requests_total` | counter | `namespace`, `outcome` |
//! | `vite_proxy_request_duration_seconds` | histogram | `namespace` |
//! | `vite_proxy_rate_limit_rejections_total` | counter | `limit` |
//! | `vite_proxy_cache_hits_total` / `_misses_total` | counter | `index` |
//! | `vite_proxy_active_filters` | gauge | |
//! | `vite_proxy_websocket_connections` | gauge | |
//! | `vite_proxy_upstream_errors_total` | counter | `node`, `error_type` |
//!
//! Namespace labels are interned so the hot path does not allocate per request.

use crate::{proxy::errors::ProxyError, upstream::errors::UpstreamError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{borrow::Cow, sync::OnceLock};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[inline]
fn namespace_to_static(namespace: &str) -> Cow<'static, str> {
    match namespace {
        "ledger" => Cow::Borrowed("ledger"),
        "subscribe" => Cow::Borrowed("subscribe"),
        "wallet" => Cow::Borrowed("wallet"),
        "heartbeat" => Cow::Borrowed("heartbeat"),
        "vpow" => Cow::Borrowed("vpow"),
        "forward" => Cow::Borrowed("forward"),
        "invalid" => Cow::Borrowed("invalid"),
        _ => Cow::Owned(namespace.to_string()),
    }
}

/// Stable label for error kinds.
pub trait MetricsState {
    fn as_metric_str(&self) -> &'static str;
}

impl MetricsState for UpstreamError {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_, _) => "rpc_error",
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ConnectionClosed => "connection_closed",
            Self::NoSyncedNodes => "no_synced_nodes",
        }
    }
}

impl MetricsState for ProxyError {
    fn as_metric_str(&self) -> &'static str {
        self.kind()
    }
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // Another recorder is already installed, e.g. in tests.
                tracing::warn!(error = %e, "using fallback Prometheus recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    /// Records one handled JSON-RPC call.
    pub fn record_request(&self, namespace: &str, error: Option<&ProxyError>, latency_ms: u64) {
        let namespace = namespace_to_static(namespace);
        let outcome = error.map_or("success", <ProxyError as MetricsState>::as_metric_str);

        counter!("vite_proxy_requests_total", "namespace" => namespace.clone(), "outcome" => outcome)
            .increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("vite_proxy_request_duration_seconds", "namespace" => namespace)
            .record(latency_ms as f64 / 1000.0);
    }

    pub fn record_rate_limit_rejection(&self, limit: &str) {
        counter!("vite_proxy_rate_limit_rejections_total", "limit" => namespace_to_static(limit))
            .increment(1);
    }

    pub fn record_cache_hit(&self, index: &'static str) {
        counter!("vite_proxy_cache_hits_total", "index" => index).increment(1);
    }

    pub fn record_cache_miss(&self, index: &'static str) {
        counter!("vite_proxy_cache_misses_total", "index" => index).increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_active_filters(&self, count: usize) {
        gauge!("vite_proxy_active_filters").set(count as f64);
    }

    pub fn record_websocket_connection(&self, connected: bool) {
        if connected {
            gauge!("vite_proxy_websocket_connections").increment(1.0);
        } else {
            gauge!("vite_proxy_websocket_connections").decrement(1.0);
        }
    }

    pub fn record_upstream_error(&self, node: &str, error: &UpstreamError) {
        counter!(
            "vite_proxy_upstream_errors_total",
            "node" => node.to_string(),
            "error_type" => error.as_metric_str()
        )
        .increment(1);
    }

    /// Renders the current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
