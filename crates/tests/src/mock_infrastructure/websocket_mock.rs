//! Mock Vite node over WebSocket.
//!
//! Answers scripted methods, confirms `subscribe_subscribe` calls and pushes
//! `subscribe_subscription` notifications to every connection subscribed to a topic.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Default)]
struct NodeState {
    responses: Mutex<HashMap<String, Value>>,
    received: Mutex<Vec<Value>>,
    next_subscription: AtomicU64,
}

/// A WebSocket server speaking just enough of the Vite node protocol for the proxy.
///
/// Unscripted methods are answered with `-32601`. `net_syncInfo` reports a synced node
/// unless scripted otherwise.
pub struct MockViteNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
    pushes: broadcast::Sender<(String, Value)>,
    server_handle: JoinHandle<()>,
}

impl MockViteNode {
    /// Starts the node on a random local port.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to a local port or retrieve the bound address.
    pub async fn start() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(NodeState::default());
        state
            .responses
            .lock()
            .insert("net_syncInfo".to_string(), json!({ "state": 2, "current": "100" }));
        let (pushes, _) = broadcast::channel(256);

        let server_handle = tokio::spawn(Self::accept_loop(listener, Arc::clone(&state), pushes.clone()));

        Ok(Self { addr, state, pushes, server_handle })
    }

    async fn accept_loop(
        listener: TcpListener,
        state: Arc<NodeState>,
        pushes: broadcast::Sender<(String, Value)>,
    ) {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(Self::handle_connection(stream, Arc::clone(&state), pushes.subscribe()));
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        state: Arc<NodeState>,
        mut pushes: broadcast::Receiver<(String, Value)>,
    ) {
        let Ok(ws_stream) = accept_async(stream).await else { return };
        let (mut write, mut read) = ws_stream.split();
        // topic -> subscription id on this connection
        let mut subscriptions: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                incoming = read.next() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                        _ => break,
                    };
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                    state.received.lock().push(request.clone());

                    let reply = Self::answer(&state, &request, &mut subscriptions);
                    if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                push = pushes.recv() => {
                    let Ok((topic, items)) = push else { break };
                    let Some(subscription) = subscriptions.get(&topic) else { continue };
                    let frame = json!({
                        "jsonrpc": "2.0",
                        "method": "subscribe_subscription",
                        "params": { "subscription": subscription, "result": items },
                    });
                    if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn answer(state: &NodeState, request: &Value, subscriptions: &mut HashMap<String, String>) -> Value {
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default();

        match method {
            "subscribe_subscribe" => {
                let topic = request["params"][0].as_str().unwrap_or_default().to_string();
                let subscription =
                    format!("0x{:x}", state.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
                subscriptions.insert(topic, subscription.clone());
                json!({ "jsonrpc": "2.0", "id": id, "result": subscription })
            }
            "subscribe_unsubscribe" => {
                let subscription = request["params"][0].as_str().unwrap_or_default();
                subscriptions.retain(|_, id| id != subscription);
                json!({ "jsonrpc": "2.0", "id": id, "result": true })
            }
            _ => match state.responses.lock().get(method) {
                Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                None => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("the method {method} does not exist") },
                }),
            },
        }
    }

    /// Returns the WebSocket URL for connecting to this node.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Scripts the result of `method`.
    pub fn respond(&self, method: &str, result: Value) {
        self.state.responses.lock().insert(method.to_string(), result);
    }

    /// Pushes `items` to every connection subscribed to `topic`.
    pub fn push(&self, topic: &str, items: Value) {
        let _ = self.pushes.send((topic.to_string(), items));
    }

    /// Pushes a snapshot block notification.
    pub fn push_snapshot_block(&self, height: u64) {
        self.push(
            "newSnapshotBlock",
            json!([{ "height": height.to_string(), "hash": super::snapshot_hash(height), "removed": false }]),
        );
    }

    /// Number of received calls to `method`.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.state.received.lock().iter().filter(|request| request["method"] == method).count()
    }

    /// Topics subscribed to so far, in order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|request| request["method"] == "subscribe_subscribe")
            .filter_map(|request| request["params"][0].as_str().map(str::to_string))
            .collect()
    }

    /// Waits until `topic` has been subscribed to.
    pub async fn wait_for_subscription(&self, topic: &str, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.subscribed_topics().iter().any(|subscribed| subscribed == topic) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for MockViteNode {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use vite_proxy_core::upstream::{UpstreamNode, WsNode};

    #[tokio::test]
    async fn test_scripted_method_and_default_sync_info() {
        let node = MockViteNode::start().await.unwrap();
        node.respond("ledger_getSnapshotChainHeight", json!("42"));

        let client = WsNode::connect(node.url(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.request("net_syncInfo", vec![]).await.unwrap()["state"], 2);
        assert_eq!(client.request("ledger_getSnapshotChainHeight", vec![]).await.unwrap(), json!("42"));
        assert!(client.request("net_peers", vec![]).await.is_err());
        assert_eq!(node.calls("ledger_getSnapshotChainHeight"), 1);
    }

    #[tokio::test]
    async fn test_push_reaches_subscription() {
        let node = MockViteNode::start().await.unwrap();
        let client = WsNode::connect(node.url(), Duration::from_secs(5)).await.unwrap();

        let mut subscription = client.subscribe("newSnapshotBlock", vec![]).await.unwrap();
        assert!(node.wait_for_subscription("newSnapshotBlock", Duration::from_secs(2)).await);

        node.push_snapshot_block(7);
        let item = tokio::time::timeout(Duration::from_secs(5), subscription.next()).await.unwrap().unwrap();
        assert_eq!(item["height"], "7");
        assert_eq!(item["hash"], json!(super::super::snapshot_hash(7)));
    }
}
