//! RPC Mock Builder for Vite JSON-RPC Testing
//!
//! Wraps mockito to provide Vite-specific response builders for the methods the proxy calls
//! on its HTTP nodes.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for creating mock Vite node responses over HTTP.
///
/// Mocks are matched by method name in the request body. A later mock for the same method
/// does not replace an earlier one; mockito serves the first unexhausted match.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    /// Creates a new RPC mock builder with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns the URL of the mock server.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    fn method_matcher(method: &str) -> Matcher {
        Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
    }

    fn result_body(result: &Value) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
    }

    /// Mocks a generic JSON-RPC method with a custom result.
    pub async fn mock_method(&mut self, method: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(Self::result_body(result))
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a method that must be called exactly `hits` times.
    pub async fn mock_method_times(&mut self, method: &str, result: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(Self::result_body(result))
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks `net_syncInfo` with the given sync `state` (2 means synced).
    pub async fn mock_sync_info(&mut self, state: u64) -> &mut Self {
        let info = json!({ "from": "1", "to": "100", "current": "100", "state": state, "status": "" });
        self.mock_method("net_syncInfo", &info).await
    }

    /// Mocks `ledger_getSnapshotBlockByHeight` for one height, matched on the decimal string
    /// parameter the proxy sends.
    pub async fn mock_snapshot_block_by_height(&mut self, height: u64, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Self::method_matcher("ledger_getSnapshotBlockByHeight"),
                Matcher::Regex(format!(r#""params"\s*:\s*\["{height}"\]"#)),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(Self::result_body(&super::create_snapshot_block(height)))
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a node-side JSON-RPC error.
    pub async fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": code, "message": message }
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a server error (500) for every request.
    pub async fn mock_server_error(&mut self) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Returns a reference to the underlying mockito server for advanced mocking.
    pub fn get_server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }

    /// Verifies every mock's hit expectation.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }

    /// Verifies all mocks were called at least once.
    #[must_use]
    pub fn verify_all_called(&self) -> bool {
        self.mocks.iter().all(Mock::matched)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vite_proxy_core::upstream::{HttpNode, UpstreamError, UpstreamNode};

    #[tokio::test]
    async fn test_mock_method_answers_http_node() {
        let mut mock = RpcMockBuilder::new().await;
        mock.mock_sync_info(2).await;

        let node = HttpNode::new(mock.url(), Duration::from_secs(5)).unwrap();
        let info = node.request("net_syncInfo", vec![]).await.unwrap();
        assert_eq!(info["state"], 2);
        assert!(mock.verify_all_called());
    }

    #[tokio::test]
    async fn test_rpc_error_keeps_code() {
        let mut mock = RpcMockBuilder::new().await;
        mock.mock_rpc_error("ledger_getAccountInfoByAddress", -32000, "address is invalid").await;

        let node = HttpNode::new(mock.url(), Duration::from_secs(5)).unwrap();
        let err = node.request("ledger_getAccountInfoByAddress", vec![json!("x")]).await.unwrap_err();
        assert_eq!(err, UpstreamError::RpcError(-32000, "address is invalid".to_string()));
    }
}
