//! Test Helper Functions and Utilities
//!
//! Fixtures for Vite payloads plus [`TestProxy`], which runs the full HTTP/WebSocket app on
//! a local port.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use server::{create_app, AppState};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use vite_proxy_core::{config::AppConfig, runtime::ViteProxyRuntime, upstream::UpstreamNode};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration pointing at one node, with in-memory stores and no network lookups.
#[must_use]
pub fn test_config(node_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstreams.nodes = vec![node_url.to_string()];
    config.upstreams.request_timeout_seconds = 5;
    config.storage.rate_limit_database_url = "sqlite::memory:".to_string();
    config.storage.wallet_database_url = "sqlite::memory:".to_string();
    config.trusted_proxies.fetch_cloudflare = false;
    config
}

/// Deterministic 64-hex snapshot hash for `height`.
#[must_use]
pub fn snapshot_hash(height: u64) -> String {
    format!("{height:064x}")
}

/// Creates a snapshot block as `ledger_getSnapshotBlockByHeight` returns it.
#[must_use]
pub fn create_snapshot_block(height: u64) -> Value {
    json!({
        "producer": "vite_94badf80abab06dd6cfe4e21c81b8ea7e2e3e1ca2b3a9f1d2f",
        "hash": snapshot_hash(height),
        "prevHash": snapshot_hash(height.saturating_sub(1)),
        "height": height.to_string(),
        "publicKey": "NRaGdIUEw0qKxmnDvQgNfxLmD1d3vGZPY9xgCjkWyDk=",
        "signature": "",
        "seed": 0,
        "nextSeedHash": "",
        "snapshotData": {},
        "timestamp": 1_600_000_000 + height,
    })
}

/// Creates a JSON-RPC request.
#[must_use]
pub fn create_json_rpc_request(id: u64, method: &str, params: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// The proxy served on `127.0.0.1` with connect info, as the binary serves it.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub runtime: ViteProxyRuntime,
    server_handle: JoinHandle<()>,
    http: reqwest::Client,
}

impl TestProxy {
    /// Builds the runtime from `config` and serves the app.
    ///
    /// With `nodes` set the runtime uses them as they are; otherwise it connects to
    /// `config.upstreams.nodes` and runs the sync check.
    ///
    /// # Panics
    ///
    /// Panics if the runtime cannot be built or the listener cannot bind.
    pub async fn start(config: AppConfig, nodes: Option<Vec<Arc<dyn UpstreamNode>>>) -> Self {
        let mut builder = ViteProxyRuntime::builder().with_config(config.clone());
        if let Some(nodes) = nodes {
            builder = builder.with_nodes(nodes).disable_chain_feed();
        }
        let runtime = builder.build().await.expect("runtime should build");

        let app = create_app(AppState::from_runtime(&runtime), &config).expect("app should build");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
        });

        Self { addr, runtime, server_handle, http: reqwest::Client::new() }
    }

    #[must_use]
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// POSTs a JSON body and returns the decoded JSON response.
    ///
    /// # Panics
    ///
    /// Panics on transport errors or a non-JSON response.
    pub async fn post(&self, path: &str, body: &Value) -> Value {
        self.post_with_headers(path, body, &[]).await
    }

    /// # Panics
    ///
    /// Panics on transport errors or a non-JSON response.
    pub async fn post_with_headers(&self, path: &str, body: &Value, headers: &[(&str, &str)]) -> Value {
        let mut request = self.http.post(self.http_url(path)).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await.expect("request").json().await.expect("json body")
    }

    /// Sends one call and returns the response envelope.
    pub async fn call(&self, method: &str, params: Value) -> Value {
        self.post("/", &create_json_rpc_request(1, method, &params)).await
    }

    /// Opens a client WebSocket on `path`.
    ///
    /// # Panics
    ///
    /// Panics if the handshake fails.
    pub async fn websocket(&self, path: &str) -> ClientSocket {
        let (socket, _) = connect_async(format!("ws://{}{path}", self.addr)).await.expect("websocket handshake");
        socket
    }

    /// Stops serving and shuts the runtime down.
    pub async fn stop(self) {
        self.server_handle.abort();
        self.runtime.shutdown().await;
    }
}

/// Sends `request` and waits for the response with the same id, skipping notifications.
///
/// # Panics
///
/// Panics if no such response arrives within five seconds.
pub async fn ws_call(socket: &mut ClientSocket, request: Value) -> Value {
    let id = request["id"].clone();
    socket.send(Message::Text(request.to_string().into())).await.expect("send");
    loop {
        let frame = next_json(socket).await.expect("response frame");
        if frame.get("method").is_none() && frame["id"] == id {
            return frame;
        }
    }
}

/// Next JSON text frame, or `None` when the socket closes.
///
/// # Panics
///
/// Panics if nothing arrives within five seconds.
pub async fn next_json(socket: &mut ClientSocket) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("websocket frame in time");
        match message {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).ok(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_block_fixture() {
        let block = create_snapshot_block(100);
        assert_eq!(block["height"], "100");
        assert_eq!(block["hash"].as_str().unwrap().len(), 64);
        assert_eq!(block["prevHash"], json!(snapshot_hash(99)));
    }

    #[test]
    fn test_create_json_rpc_request() {
        let request = create_json_rpc_request(3, "net_peers", &json!([]));
        assert_eq!(request["id"], 3);
        assert_eq!(request["method"], "net_peers");
    }
}
