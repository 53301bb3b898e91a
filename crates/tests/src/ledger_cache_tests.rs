//! Snapshot block caching and the chain tip, through the served app.

use crate::mock_infrastructure::{
    create_snapshot_block, eventually, snapshot_hash, test_config, RpcMockBuilder, TestProxy,
};
use futures_util::future::join_all;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use vite_proxy_core::{
    config::AppConfig,
    types::ChainEvent,
    upstream::{HttpNode, UpstreamNode},
};

async fn start(mock: &RpcMockBuilder, config: AppConfig) -> TestProxy {
    let node = HttpNode::new(mock.url(), Duration::from_secs(5)).unwrap();
    TestProxy::start(config, Some(vec![Arc::new(node) as Arc<dyn UpstreamNode>])).await
}

#[tokio::test]
async fn test_block_by_height_is_fetched_once() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_snapshot_block_by_height(100, 1).await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    for params in [json!(["100"]), json!([100]), json!(["100"])] {
        let response = proxy.call("ledger_getSnapshotBlockByHeight", params).await;
        assert_eq!(response["result"], create_snapshot_block(100));
    }

    mock.assert_all().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_snapshot_block_by_height(7, 1).await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    let calls = (0..8).map(|_| proxy.call("ledger_getSnapshotBlockByHeight", json!(["7"])));
    for response in join_all(calls).await {
        assert_eq!(response["result"]["height"], "7");
    }

    mock.assert_all().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_block_by_hash_reuses_height_entry() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_snapshot_block_by_height(12, 1).await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    proxy.call("ledger_getSnapshotBlockByHeight", json!(["12"])).await;
    // No by-hash mock exists, so an upstream call would fail.
    let response = proxy.call("ledger_getSnapshotBlockByHash", json!([snapshot_hash(12)])).await;
    assert_eq!(response["result"], create_snapshot_block(12));

    let cache = proxy.runtime.components().response_cache().unwrap();
    assert_eq!(cache.get_by_height(12), Some(create_snapshot_block(12)));
    proxy.stop().await;
}

#[tokio::test]
async fn test_invalid_ledger_params_are_rejected_locally() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    for (method, params) in [
        ("ledger_getSnapshotBlockByHeight", json!(["-1"])),
        ("ledger_getSnapshotBlockByHeight", json!(["0x10"])),
        ("ledger_getSnapshotBlockByHeight", json!([])),
        ("ledger_getSnapshotBlockByHash", json!(["ABCD"])),
        ("ledger_getSnapshotBlockByHash", json!([snapshot_hash(1), "extra"])),
    ] {
        let response = proxy.call(method, params.clone()).await;
        assert_eq!(response["error"]["code"], -32002, "{method} {params}");
    }
    proxy.stop().await;
}

#[tokio::test]
async fn test_chain_tip_follows_snapshot_events() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("ledger_getSnapshotChainHeight", &json!("5")).await;
    mock.mock_snapshot_block_by_height(300, 1).await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    // No event yet: forwarded.
    let response = proxy.call("ledger_getSnapshotChainHeight", json!([])).await;
    assert_eq!(response["result"], "5");

    proxy.runtime.components().event_bus().publish(ChainEvent::SnapshotBlock {
        height: 300,
        hash: snapshot_hash(300),
        removed: false,
    });
    let chain = proxy.runtime.components().chain_state();
    assert!(eventually(|| chain.height() == Some(300)).await);

    let response = proxy.call("ledger_getSnapshotChainHeight", json!([])).await;
    assert_eq!(response["result"], "300");
    let response = proxy.call("ledger_getLatestSnapshotHash", json!([])).await;
    assert_eq!(response["result"], json!(snapshot_hash(300)));

    // The warm-up fetched the block, so the latest block and the by-hash lookup hit the cache.
    let cache = proxy.runtime.components().response_cache().unwrap();
    assert!(eventually(|| cache.get_by_height(300).is_some()).await);
    let response = proxy.call("ledger_getLatestSnapshotBlock", json!([])).await;
    assert_eq!(response["result"], create_snapshot_block(300));
    let response = proxy.call("ledger_getSnapshotBlockByHash", json!([snapshot_hash(300)])).await;
    assert_eq!(response["result"]["height"], "300");

    mock.assert_all().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_caching_disabled_forwards_every_lookup() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_snapshot_block_by_height(9, 2).await;
    let mut config = test_config(&mock.url());
    config.modules.caching = false;
    let proxy = start(&mock, config).await;

    for _ in 0..2 {
        let response = proxy.call("ledger_getSnapshotBlockByHeight", json!(["9"])).await;
        assert_eq!(response["result"]["height"], "9");
    }

    assert!(proxy.runtime.components().response_cache().is_none());
    mock.assert_all().await;
    proxy.stop().await;
}
