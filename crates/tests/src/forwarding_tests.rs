//! HTTP JSON-RPC forwarding through the served app.

use crate::mock_infrastructure::{create_json_rpc_request, test_config, RpcMockBuilder, TestProxy};
use serde_json::{json, Value};
use vite_proxy_core::{
    runtime::{RuntimeError, ViteProxyRuntime},
    upstream::UpstreamError,
};

#[tokio::test]
async fn test_unregistered_method_is_forwarded_verbatim() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    mock.mock_method("ledger_getAccountInfoByAddress", &json!({ "balanceInfoMap": {} })).await;

    let proxy = TestProxy::start(test_config(&mock.url()), None).await;
    let response = proxy
        .post("/", &create_json_rpc_request(42, "ledger_getAccountInfoByAddress", &json!(["vite_x"])))
        .await;

    assert_eq!(response, json!({ "jsonrpc": "2.0", "id": 42, "result": { "balanceInfoMap": {} } }));
    proxy.stop().await;
}

#[tokio::test]
async fn test_node_error_keeps_code_and_message() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    mock.mock_rpc_error("tx_sendRawTransaction", -36001, "verify prevBlock failed").await;

    let proxy = TestProxy::start(test_config(&mock.url()), None).await;
    let response = proxy.call("tx_sendRawTransaction", json!([{}])).await;

    assert_eq!(response["error"]["code"], -36001);
    assert_eq!(response["error"]["message"], "verify prevBlock failed");
    assert_eq!(response["id"], 1);
    assert!(response.get("result").is_none());
    proxy.stop().await;
}

#[tokio::test]
async fn test_unreachable_node_is_an_error_response() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_server_error().await;

    let mut config = test_config(&mock.url());
    config.upstreams.sync_check = false;
    let proxy = TestProxy::start(config, None).await;

    let response = proxy.call("net_peers", json!([])).await;
    assert!(response["error"]["code"].is_i64());
    assert!(response.get("result").is_none());
    proxy.stop().await;
}

#[tokio::test]
async fn test_batch_over_http_keeps_order() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    mock.mock_method("net_peers", &json!({ "peersCount": 4 })).await;

    let proxy = TestProxy::start(test_config(&mock.url()), None).await;
    let batch = json!([
        create_json_rpc_request(1, "net_peers", &json!([])),
        { "jsonrpc": "2.0", "id": 2, "method": "wallet_unlock", "params": ["x", "y"] },
        { "id": 3, "method": "net_peers" },
        create_json_rpc_request(4, "net_peers", &json!([])),
    ]);

    let response = proxy.post("/rpc", &batch).await;
    let items = response.as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0]["result"]["peersCount"], 4);
    // wallet module is disabled, so the call is forwarded and the node has no such method
    assert_eq!(items[1]["id"], 2);
    assert!(items[1]["error"].is_object());
    assert_eq!(items[2]["error"]["code"], -32002);
    assert_eq!(items[2]["id"], 3);
    assert_eq!(items[3]["id"], 4);
    proxy.stop().await;
}

#[tokio::test]
async fn test_empty_batch_is_empty_array() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;

    let proxy = TestProxy::start(test_config(&mock.url()), None).await;
    assert_eq!(proxy.post("/", &json!([])).await, json!([]));
    proxy.stop().await;
}

#[tokio::test]
async fn test_invalid_envelopes_are_validation_errors() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    let proxy = TestProxy::start(test_config(&mock.url()), None).await;

    for body in [
        json!({ "jsonrpc": "2.0", "id": 1 }),
        json!({ "jsonrpc": "2.0", "id": 1, "method": 5 }),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "net_peers", "params": {} }),
        json!({ "jsonrpc": "2.0", "id": { "nested": true }, "method": "net_peers" }),
        json!("just a string"),
    ] {
        let response = proxy.post("/", &body).await;
        assert_eq!(response["error"]["code"], -32002, "body {body}");
        let message = response["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("ValidationError: "), "message {message}");
    }
    proxy.stop().await;
}

#[tokio::test]
async fn test_configured_headers_and_metrics_endpoint() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    mock.mock_method("net_peers", &json!([])).await;

    let mut config = test_config(&mock.url());
    config.server.headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
    let proxy = TestProxy::start(config, None).await;

    proxy.call("net_peers", json!([])).await;

    let response = reqwest::get(proxy.http_url("/metrics")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = response.text().await.unwrap();
    assert!(body.contains("vite_proxy_requests_total"), "metrics body: {body}");
    proxy.stop().await;
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;

    let mut config = test_config(&mock.url());
    config.metrics.enabled = false;
    let proxy = TestProxy::start(config, None).await;

    // Falls through to the catch-all, which only upgrades WebSockets on GET.
    let response = reqwest::get(proxy.http_url("/metrics")).await.unwrap();
    assert_ne!(response.status(), 200);
    proxy.stop().await;
}

#[tokio::test]
async fn test_forwarded_for_identifies_clients_behind_local_proxy() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(2).await;
    mock.mock_method("net_peers", &json!("peers")).await;

    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 1;
    let proxy = TestProxy::start(config, None).await;
    let body = create_json_rpc_request(1, "net_peers", &json!([]));

    let first = proxy.post_with_headers("/", &body, &[("x-forwarded-for", "198.51.100.1")]).await;
    assert_eq!(first["result"], "peers");

    let again = proxy.post_with_headers("/", &body, &[("x-forwarded-for", "198.51.100.1")]).await;
    assert_eq!(again["error"]["code"], -35005);

    let other = proxy
        .post_with_headers("/", &body, &[("x-forwarded-for", "203.0.113.9, 198.51.100.2")])
        .await;
    assert_eq!(other["result"], "peers");
    proxy.stop().await;
}

#[tokio::test]
async fn test_unsynced_node_fails_startup() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_sync_info(1).await;

    let result = ViteProxyRuntime::builder().with_config(test_config(&mock.url())).build().await;
    assert!(matches!(result, Err(RuntimeError::Upstream(UpstreamError::NoSyncedNodes))));
    assert!(mock.verify_all_called());
}

#[tokio::test]
async fn test_sync_check_can_be_disabled() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("net_peers", &Value::Null).await;

    let mut config = test_config(&mock.url());
    config.upstreams.sync_check = false;
    let proxy = TestProxy::start(config, None).await;

    let response = proxy.call("net_peers", json!([])).await;
    assert_eq!(response, json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
    proxy.stop().await;
}
