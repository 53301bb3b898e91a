//! Scripted in-memory node for unit tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use super::{
    errors::UpstreamError,
    node::{UpstreamNode, UpstreamSubscription, SUBSCRIPTION_BUFFER},
};

#[derive(Default)]
struct Inner {
    url: String,
    websocket: bool,
    responses: DashMap<String, (Result<Value, UpstreamError>, Option<Duration>)>,
    calls: DashMap<String, usize>,
    params: DashMap<String, Vec<Value>>,
    subscribers: DashMap<String, Vec<mpsc::Sender<Value>>>,
    subscribe_calls: DashMap<String, usize>,
    closed: AtomicU64,
    next_subscription: AtomicU64,
}

/// Node that answers from a script and records every call.
#[derive(Clone, Default)]
pub struct MockNode {
    inner: Arc<Inner>,
}

impl MockNode {
    pub fn new(url: &str) -> Self {
        Self { inner: Arc::new(Inner { url: url.to_string(), ..Default::default() }) }
    }

    pub fn websocket(self) -> Self {
        let inner = Arc::try_unwrap(self.inner).unwrap_or_else(|_| panic!("node already shared"));
        Self { inner: Arc::new(Inner { websocket: true, ..inner }) }
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.inner.responses.insert(method.to_string(), (Ok(result), None));
    }

    pub fn respond_after(&self, method: &str, result: Value, delay: Duration) {
        self.inner.responses.insert(method.to_string(), (Ok(result), Some(delay)));
    }

    pub fn fail(&self, method: &str, error: UpstreamError) {
        self.inner.responses.insert(method.to_string(), (Err(error), None));
    }

    pub fn calls(&self, method: &str) -> usize {
        self.inner.calls.get(method).map_or(0, |count| *count)
    }

    pub fn last_params(&self, method: &str) -> Option<Vec<Value>> {
        self.inner.params.get(method).map(|params| params.clone())
    }

    pub fn subscribe_calls(&self, topic: &str) -> usize {
        self.inner.subscribe_calls.get(topic).map_or(0, |count| *count)
    }

    pub fn closed_subscriptions(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Pushes one item to every open subscription on `topic`.
    pub fn emit(&self, topic: &str, item: Value) {
        if let Some(mut sinks) = self.inner.subscribers.get_mut(topic) {
            sinks.retain(|sink| sink.try_send(item.clone()).is_ok());
        }
    }

    /// Ends every open subscription stream, as a dropped connection would.
    pub fn drop_subscriptions(&self) {
        self.inner.subscribers.clear();
    }
}

#[async_trait]
impl UpstreamNode for MockNode {
    fn url(&self) -> &str {
        &self.inner.url
    }

    fn is_websocket(&self) -> bool {
        self.inner.websocket
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, UpstreamError> {
        *self.inner.calls.entry(method.to_string()).or_insert(0) += 1;
        self.inner.params.insert(method.to_string(), params);

        let scripted = self.inner.responses.get(method).map(|entry| entry.clone());
        match scripted {
            Some((result, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Err(UpstreamError::RpcError(-32601, format!("method {method} not found"))),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        _params: Vec<Value>,
    ) -> Result<UpstreamSubscription, UpstreamError> {
        *self.inner.subscribe_calls.entry(topic.to_string()).or_insert(0) += 1;
        let (sink, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner.subscribers.entry(topic.to_string()).or_default().push(sink);

        let id = format!("0x{:x}", self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        let inner = Arc::clone(&self.inner);
        Ok(UpstreamSubscription::new(id, events, move || {
            inner.closed.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
