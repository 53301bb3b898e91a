//! The chain feed against a WebSocket node: node pushes reach the cache, the tip and clients.

use crate::mock_infrastructure::{
    create_json_rpc_request, create_snapshot_block, eventually, next_json, snapshot_hash, test_config, ws_call,
    MockViteNode, TestProxy,
};
use serde_json::json;
use std::time::Duration;
use vite_proxy_core::utils::ViteAddress;

async fn connected() -> (MockViteNode, TestProxy) {
    let node = MockViteNode::start().await.unwrap();
    let proxy = TestProxy::start(test_config(&node.url()), None).await;
    assert!(node.wait_for_subscription("newSnapshotBlock", Duration::from_secs(5)).await);
    assert!(node.wait_for_subscription("newAccountBlock", Duration::from_secs(5)).await);
    (node, proxy)
}

#[tokio::test]
async fn test_startup_checks_sync_and_subscribes() {
    let (node, proxy) = connected().await;

    assert!(node.calls("net_syncInfo") >= 1);
    let mut topics = node.subscribed_topics();
    topics.sort();
    topics.dedup();
    assert_eq!(topics, vec!["newAccountBlock".to_string(), "newSnapshotBlock".to_string()]);
    proxy.stop().await;
}

#[tokio::test]
async fn test_pushed_snapshot_block_moves_the_tip() {
    let (node, proxy) = connected().await;
    node.respond("ledger_getSnapshotBlockByHeight", create_snapshot_block(50));

    node.push_snapshot_block(50);
    let chain = proxy.runtime.components().chain_state();
    assert!(eventually(|| chain.height() == Some(50)).await);
    assert_eq!(chain.hash(), Some(snapshot_hash(50)));

    let height = proxy.call("ledger_getSnapshotChainHeight", json!([])).await;
    assert_eq!(height["result"], "50");

    let cache = proxy.runtime.components().response_cache().unwrap();
    assert!(eventually(|| cache.get_by_height(50).is_some()).await);
    let block = proxy.call("ledger_getSnapshotBlockByHash", json!([snapshot_hash(50)])).await;
    assert_eq!(block["result"], create_snapshot_block(50));
    assert_eq!(node.calls("ledger_getSnapshotBlockByHeight"), 1);
    proxy.stop().await;
}

#[tokio::test]
async fn test_client_subscription_receives_node_pushes() {
    let (node, proxy) = connected().await;
    node.respond("ledger_getSnapshotBlockByHeight", create_snapshot_block(8));
    let mut socket = proxy.websocket("/").await;

    let subscribed = ws_call(
        &mut socket,
        create_json_rpc_request(1, "subscribe_subscribe", &json!(["createSnapshotBlockSubscription"])),
    )
    .await;
    let id = subscribed["result"].clone();

    node.push_snapshot_block(8);
    let frame = next_json(&mut socket).await.unwrap();
    assert_eq!(frame["method"], "subscribe_subscription");
    assert_eq!(frame["params"]["subscription"], id);
    assert_eq!(frame["params"]["result"], json!([{ "height": "8", "hash": snapshot_hash(8), "removed": false }]));
    proxy.stop().await;
}

#[tokio::test]
async fn test_account_blocks_are_resolved_for_address_topics() {
    let (node, proxy) = connected().await;
    let sender = ViteAddress::from_public_key(&[3u8; 32]).to_string();
    let receiver = ViteAddress::from_public_key(&[4u8; 32]).to_string();
    let hash = "5a".repeat(32);
    node.respond(
        "ledger_getAccountBlockByHash",
        json!({
            "blockType": 2,
            "height": "17",
            "hash": hash,
            "address": sender,
            "toAddress": receiver,
            "receiveBlockHash": null,
        }),
    );

    let mut socket = proxy.websocket("/").await;
    let plain = ws_call(&mut socket, create_json_rpc_request(1, "subscribe_subscribe", &json!(["newAccountBlock"])))
        .await["result"]
        .clone();
    let unreceived = ws_call(
        &mut socket,
        create_json_rpc_request(2, "subscribe_subscribe", &json!(["newUnreceivedBlockByAddress", receiver])),
    )
    .await["result"]
        .clone();

    node.push("newAccountBlock", json!([{ "hash": hash, "removed": false }]));

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let frame = next_json(&mut socket).await.unwrap();
        seen.push((frame["params"]["subscription"].clone(), frame["params"]["result"][0].clone()));
    }
    assert!(seen.contains(&(plain, json!({ "hash": hash, "removed": false }))));
    assert!(seen.contains(&(unreceived, json!({ "received": false, "hash": hash, "removed": false }))));
    assert!(eventually(|| node.calls("ledger_getAccountBlockByHash") == 1).await);
    proxy.stop().await;
}

#[tokio::test]
async fn test_node_methods_are_forwarded_over_websocket() {
    let (node, proxy) = connected().await;
    node.respond("net_peers", json!({ "peersCount": 12 }));

    let response = proxy.call("net_peers", json!([])).await;
    assert_eq!(response["result"]["peersCount"], 12);

    // Unscripted methods come back as the node's error.
    let missing = proxy.call("net_nodeInfo", json!([])).await;
    assert_eq!(missing["error"]["code"], -32601);
    assert!(missing.get("result").is_none());
    proxy.stop().await;
}
