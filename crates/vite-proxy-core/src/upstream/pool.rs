//! The set of nodes requests are forwarded to.

use rand::seq::SliceRandom;
use serde_json::Value;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{errors::UpstreamError, http_client::HttpNode, node::UpstreamNode, websocket::WsNode};
use crate::{config::UpstreamsConfig, metrics::MetricsCollector};

/// `net_syncInfo` state of a node that finished syncing.
pub const SYNC_STATE_DONE: u64 = 2;

/// Nodes that passed the startup sync check.
///
/// Forwarding picks a node uniformly at random for every call. The subscription node, used for
/// the chain feed and vmlog subscriptions, is the first WebSocket node, or the first node when
/// only HTTP nodes are configured.
pub struct NodePool {
    nodes: Vec<Arc<dyn UpstreamNode>>,
    subscription_node: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl NodePool {
    /// # Errors
    /// Returns [`UpstreamError::NoSyncedNodes`] when `nodes` is empty.
    pub fn new(nodes: Vec<Arc<dyn UpstreamNode>>) -> Result<Self, UpstreamError> {
        if nodes.is_empty() {
            return Err(UpstreamError::NoSyncedNodes);
        }
        let subscription_node = match nodes.iter().position(|node| node.is_websocket()) {
            Some(index) => index,
            None => {
                tracing::warn!("no websocket node configured, subscription events will be polled over HTTP");
                0
            }
        };
        Ok(Self { nodes, subscription_node, metrics: None })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds a node per configured URL, then drops the ones that are not synced.
    ///
    /// Nodes that cannot be reached at all are dropped with the unsynced ones.
    ///
    /// # Errors
    /// Returns [`UpstreamError::NoSyncedNodes`] when no node survives.
    pub async fn connect(config: &UpstreamsConfig) -> Result<Self, UpstreamError> {
        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let mut nodes: Vec<Arc<dyn UpstreamNode>> = Vec::with_capacity(config.nodes.len());

        for url in &config.nodes {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                match WsNode::connect(url.as_str(), timeout).await {
                    Ok(node) => nodes.push(Arc::new(node)),
                    Err(e) => tracing::error!(node = %url, error = %e, "failed to connect to node"),
                }
            } else {
                nodes.push(Arc::new(HttpNode::new(url.as_str(), timeout)?));
            }
        }

        if config.sync_check {
            nodes = Self::synced(nodes).await;
        }
        Self::new(nodes)
    }

    /// Keeps the nodes whose `net_syncInfo` reports a finished sync.
    pub async fn synced(nodes: Vec<Arc<dyn UpstreamNode>>) -> Vec<Arc<dyn UpstreamNode>> {
        let checks = nodes.iter().map(|node| async move {
            match node.request("net_syncInfo", Vec::new()).await {
                Ok(info) if sync_state(&info) == Some(SYNC_STATE_DONE) => true,
                Ok(info) => {
                    tracing::warn!(node = %node.url(), sync_info = %info, "node is not synced, removing it");
                    false
                }
                Err(e) => {
                    tracing::warn!(node = %node.url(), error = %e, "sync check failed, removing node");
                    false
                }
            }
        });
        let verdicts = futures::future::join_all(checks).await;
        nodes.into_iter().zip(verdicts).filter_map(|(node, synced)| synced.then_some(node)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn nodes(&self) -> &[Arc<dyn UpstreamNode>] {
        &self.nodes
    }

    #[must_use]
    pub fn random(&self) -> &Arc<dyn UpstreamNode> {
        // `new` rejects an empty pool, so there is always a node to choose.
        self.nodes.choose(&mut rand::thread_rng()).unwrap_or(&self.nodes[self.subscription_node])
    }

    #[must_use]
    pub fn subscription_node(&self) -> &Arc<dyn UpstreamNode> {
        &self.nodes[self.subscription_node]
    }

    /// WebSocket nodes other than the subscription node.
    pub fn keepalive_nodes(&self) -> impl Iterator<Item = &Arc<dyn UpstreamNode>> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(index, node)| *index != self.subscription_node && node.is_websocket())
            .map(|(_, node)| node)
    }

    /// Forwards a call verbatim to a random node.
    ///
    /// # Errors
    /// Returns the node's error unchanged; there is no retry on another node.
    pub async fn forward(&self, method: &str, params: Vec<Value>) -> Result<Value, UpstreamError> {
        let node = self.random();
        let started = Instant::now();
        let result = node.request(method, params).await;

        match &result {
            Ok(_) => tracing::trace!(
                node = %node.url(),
                method,
                latency_ms = started.elapsed().as_millis() as u64,
                "forwarded request"
            ),
            Err(e) => {
                tracing::debug!(node = %node.url(), method, error = %e, "forwarded request failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_upstream_error(node.url(), e);
                }
            }
        }
        result
    }
}

/// Reads the `state` field of a `net_syncInfo` result, numeric or string.
#[must_use]
pub fn sync_state(info: &Value) -> Option<u64> {
    match info.get("state")? {
        Value::Number(state) => state.as_u64(),
        Value::String(state) => state.parse().ok(),
        _ => None,
    }
}
