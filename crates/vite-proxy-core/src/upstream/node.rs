//! The seam between the proxy and a single Vite node.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::errors::UpstreamError;

/// Buffered notifications per upstream subscription before new ones are dropped.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// One Vite node reachable over HTTP or WebSocket.
#[async_trait]
pub trait UpstreamNode: Send + Sync {
    fn url(&self) -> &str;

    fn is_websocket(&self) -> bool;

    /// Sends one JSON-RPC call and returns its `result`.
    ///
    /// # Errors
    /// Node-side errors come back as [`UpstreamError::RpcError`] with the node's code.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, UpstreamError>;

    /// Opens a node-side subscription on `topic`.
    ///
    /// Each element of a notification's `result` array is delivered as its own event.
    ///
    /// # Errors
    /// Fails when the node rejects the subscription or cannot be reached.
    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<UpstreamSubscription, UpstreamError>;

    /// `contract_getContractInfo(address)`, used to check that a contract exists.
    ///
    /// # Errors
    /// Propagates the underlying request failure.
    async fn contract_info(&self, address: &str) -> Result<Value, UpstreamError> {
        self.request("contract_getContractInfo", vec![json!(address)]).await
    }
}

type Closer = Box<dyn FnOnce() + Send>;

/// A live node-side subscription.
///
/// The event stream ends when the node connection drops. Closing or dropping the handle
/// releases the node-side resources once.
pub struct UpstreamSubscription {
    id: String,
    events: mpsc::Receiver<Value>,
    closer: Option<Closer>,
}

impl UpstreamSubscription {
    pub fn new(
        id: impl Into<String>,
        events: mpsc::Receiver<Value>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { id: id.into(), events, closer: Some(Box::new(closer)) }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next notification item, or `None` once the node side is gone.
    pub async fn next(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

impl Drop for UpstreamSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for UpstreamSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSubscription").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Forwards every item of a notification's `result` to `sink`.
///
/// Returns `false` once the receiving side has gone away.
pub(crate) fn deliver_items(sink: &mpsc::Sender<Value>, result: Value) -> bool {
    let items = match result {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    for item in items {
        match sink.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("upstream subscription buffer full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
        }
    }
    true
}
