//! JSON-RPC and push subscriptions over the WebSocket endpoint.

use crate::mock_infrastructure::{
    create_json_rpc_request, eventually, next_json, snapshot_hash, test_config, ws_call, RpcMockBuilder,
    TestProxy,
};
use futures_util::SinkExt;
use serde_json::{json, Value};
use serial_test::serial;
use std::{sync::Arc, time::Duration};
use tokio_tungstenite::tungstenite::Message;
use vite_proxy_core::{
    config::AppConfig,
    types::ChainEvent,
    upstream::{HttpNode, UpstreamNode},
};

async fn start(mock: &RpcMockBuilder, config: AppConfig) -> TestProxy {
    let node = HttpNode::new(mock.url(), Duration::from_secs(5)).unwrap();
    TestProxy::start(config, Some(vec![Arc::new(node) as Arc<dyn UpstreamNode>])).await
}

fn snapshot_event(height: u64) -> ChainEvent {
    ChainEvent::SnapshotBlock { height, hash: snapshot_hash(height), removed: false }
}

#[tokio::test]
async fn test_requests_are_answered_on_any_path() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("net_peers", &json!({ "peersCount": 2 })).await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    for path in ["/", "/ws", "/anything/else"] {
        let mut socket = proxy.websocket(path).await;
        let response = ws_call(&mut socket, create_json_rpc_request(9, "net_peers", &json!([]))).await;
        assert_eq!(response, json!({ "jsonrpc": "2.0", "id": 9, "result": { "peersCount": 2 } }));
    }
    proxy.stop().await;
}

#[tokio::test]
async fn test_batch_over_websocket() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("net_peers", &json!("peers")).await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let mut socket = proxy.websocket("/").await;

    let batch = json!([
        create_json_rpc_request(1, "net_peers", &json!([])),
        { "jsonrpc": "2.0", "id": 2, "method": "" },
    ]);
    socket.send(Message::Text(batch.to_string().into())).await.unwrap();
    let response = next_json(&mut socket).await.unwrap();

    let items = response.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["result"], "peers");
    assert_eq!(items[1]["error"]["code"], -32002);
    proxy.stop().await;
}

#[tokio::test]
async fn test_invalid_json_closes_the_socket() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let mut socket = proxy.websocket("/").await;

    socket.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(next_json(&mut socket).await, None);
    proxy.stop().await;
}

#[tokio::test]
async fn test_push_subscription_receives_snapshot_blocks() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let mut socket = proxy.websocket("/").await;

    let subscribed = ws_call(
        &mut socket,
        create_json_rpc_request(1, "subscribe_subscribe", &json!(["newSnapshotBlock"])),
    )
    .await;
    let id = subscribed["result"].as_str().unwrap().to_string();
    assert!(id.starts_with("0x"));
    assert_eq!(id.len(), 34);

    proxy.runtime.components().event_bus().publish(snapshot_event(77));

    let frame = next_json(&mut socket).await.unwrap();
    assert_eq!(
        frame,
        json!({
            "jsonrpc": "2.0",
            "method": "subscribe_subscription",
            "params": {
                "subscription": id,
                "result": [{ "height": "77", "hash": snapshot_hash(77), "removed": false }]
            }
        })
    );
    proxy.stop().await;
}

#[tokio::test]
async fn test_legacy_snapshot_topic_payload() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let mut socket = proxy.websocket("/").await;

    ws_call(&mut socket, create_json_rpc_request(1, "subscribe_subscribe", &json!(["newSnapshotBlocks"]))).await;
    proxy.runtime.components().event_bus().publish(snapshot_event(5));

    let frame = next_json(&mut socket).await.unwrap();
    assert_eq!(
        frame["params"]["result"][0],
        json!({ "height": 5, "heightStr": "5", "hash": snapshot_hash(5), "removed": false })
    );
    proxy.stop().await;
}

#[tokio::test]
async fn test_subscription_listeners_stop_with_the_socket() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let bus = proxy.runtime.components().event_bus().clone();
    let baseline = bus.receiver_count();

    let mut socket = proxy.websocket("/").await;
    for id in 1..=2 {
        ws_call(&mut socket, create_json_rpc_request(id, "subscribe_subscribe", &json!(["newAccountBlocks"])))
            .await;
    }
    assert_eq!(bus.receiver_count(), baseline + 2);

    socket.close(None).await.unwrap();
    drop(socket);
    assert!(eventually(|| bus.receiver_count() == baseline).await);
    proxy.stop().await;
}

#[tokio::test]
async fn test_subscription_errors() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    let over_http = proxy.call("subscribe_subscribe", json!(["newSnapshotBlock"])).await;
    assert_eq!(over_http["error"]["code"], -32600);
    assert_eq!(over_http["error"]["message"], "Cannot start a subscription with no notifier");

    let mut socket = proxy.websocket("/").await;
    let unknown = ws_call(&mut socket, create_json_rpc_request(1, "subscribe_subscribe", &json!(["newThings"]))).await;
    assert_eq!(unknown["error"]["code"], -32601);
    assert_eq!(unknown["error"]["message"], "Couldn't start subscription; newThings is not implemented");

    let extra = ws_call(
        &mut socket,
        create_json_rpc_request(2, "subscribe_subscribe", &json!(["newSnapshotBlock", "extra"])),
    )
    .await;
    assert_eq!(extra["error"]["code"], -32002);
    proxy.stop().await;
}

#[tokio::test]
async fn test_heartbeat_requires_websocket_and_single_start() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    let over_http = proxy.call("heartbeat_start", json!([])).await;
    assert_eq!(over_http["error"]["message"], "Cannot enable heartbeat on a non-websocket connection");

    let mut socket = proxy.websocket("/").await;
    let early = ws_call(&mut socket, create_json_rpc_request(1, "heartbeat_ping", &json!([]))).await;
    assert_eq!(early["error"]["code"], -32002);

    let started = ws_call(&mut socket, create_json_rpc_request(2, "heartbeat_start", &json!([]))).await;
    assert_eq!(started["result"], true);
    let again = ws_call(&mut socket, create_json_rpc_request(3, "heartbeat_start", &json!([]))).await;
    assert_eq!(again["error"]["message"], "Heartbeat is already enabled on this connection");

    let ping = ws_call(&mut socket, create_json_rpc_request(4, "heartbeat_ping", &json!([1_600_000_000_000u64])))
        .await;
    assert_eq!(ping["result"], true);
    proxy.stop().await;
}

#[tokio::test]
#[serial]
async fn test_silent_heartbeat_closes_the_socket() {
    let mock = RpcMockBuilder::new().await;
    let mut config = test_config(&mock.url());
    config.heartbeat.timeout_seconds = 1;
    let proxy = start(&mock, config).await;
    let mut socket = proxy.websocket("/").await;

    let started = ws_call(&mut socket, create_json_rpc_request(1, "heartbeat_start", &json!([]))).await;
    assert_eq!(started["result"], true);

    // Pings inside the timeout keep the connection open.
    for id in 2..5 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let ping = ws_call(&mut socket, create_json_rpc_request(id, "heartbeat_ping", &json!([]))).await;
        assert_eq!(ping["result"], true);
    }

    assert_eq!(next_json(&mut socket).await, None::<Value>);
    proxy.stop().await;
}
