//! Poll filters in the `subscribe` namespace, over HTTP.

use crate::mock_infrastructure::{eventually, snapshot_hash, test_config, RpcMockBuilder, TestProxy};
use serde_json::{json, Value};
use serial_test::serial;
use std::{sync::Arc, time::Duration};
use vite_proxy_core::{
    config::AppConfig,
    types::{AccountBlock, ChainEvent},
    upstream::{HttpNode, UpstreamNode},
    utils::ViteAddress,
};

async fn start(mock: &RpcMockBuilder, config: AppConfig) -> TestProxy {
    let node = HttpNode::new(mock.url(), Duration::from_secs(5))
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    TestProxy::start(config, Some(vec![Arc::new(node) as Arc<dyn UpstreamNode>])).await
}

async fn new_filter(proxy: &TestProxy, method: &str, params: Value) -> String {
    let response = proxy.call(&format!("subscribe_{method}"), params).await;
    response["result"].as_str().unwrap_or_else(|| panic!("no filter id: {response}")).to_string()
}

fn user_address() -> ViteAddress {
    ViteAddress::from_public_key(&[7u8; 32])
}

fn contract_address() -> ViteAddress {
    let mut original = [9u8; 21];
    original[20] = 1;
    ViteAddress::from_original(&original).unwrap()
}

#[tokio::test]
async fn test_filter_collects_events_between_polls() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let id = new_filter(&proxy, "newSnapshotBlockFilter", json!([])).await;
    assert!(id.starts_with("0x"));

    let bus = proxy.runtime.components().event_bus();
    for height in [10, 11] {
        bus.publish(ChainEvent::SnapshotBlock { height, hash: snapshot_hash(height), removed: false });
    }

    let mut collected = Vec::new();
    for _ in 0..100 {
        let changes = proxy.call("subscribe_getFilterChanges", json!([id])).await;
        assert_eq!(changes["result"]["subscription"], json!(id));
        collected.extend(changes["result"]["result"].as_array().unwrap().iter().cloned());
        if collected.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        collected,
        vec![
            json!({ "height": "10", "hash": snapshot_hash(10), "removed": false }),
            json!({ "height": "11", "hash": snapshot_hash(11), "removed": false }),
        ]
    );

    let drained = proxy.call("subscribe_getChangesByFilterId", json!([id])).await;
    assert_eq!(drained["result"]["result"], json!([]));
    proxy.stop().await;
}

#[tokio::test]
async fn test_legacy_filter_payload() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let id = new_filter(&proxy, "newSnapshotBlocksFilter", json!([])).await;

    proxy.runtime.components().event_bus().publish(ChainEvent::SnapshotBlock {
        height: 3,
        hash: snapshot_hash(3),
        removed: true,
    });

    let mut result = Value::Null;
    for _ in 0..100 {
        let changes = proxy.call("subscribe_getFilterChanges", json!([id])).await;
        result = changes["result"]["result"][0].clone();
        if !result.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(result, json!({ "height": 3, "heightStr": "3", "hash": snapshot_hash(3), "removed": true }));
    proxy.stop().await;
}

#[tokio::test]
async fn test_uninstall_filter() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let hub = proxy.runtime.components().subscription_hub();
    let id = new_filter(&proxy, "newAccountBlockFilter", json!([])).await;
    assert_eq!(hub.active_filters(), 1);

    assert_eq!(proxy.call("subscribe_uninstallFilter", json!([id])).await["result"], true);
    assert_eq!(proxy.call("subscribe_uninstallFilter", json!([id])).await["result"], false);
    assert_eq!(hub.active_filters(), 0);

    let gone = proxy.call("subscribe_getFilterChanges", json!([id])).await;
    assert_eq!(gone["error"]["code"], -32002);
    assert_eq!(gone["error"]["message"], "Filter not found");
    proxy.stop().await;
}

#[tokio::test]
#[serial]
async fn test_unpolled_filter_expires() {
    let mock = RpcMockBuilder::new().await;
    let mut config = test_config(&mock.url());
    config.subscriptions.filter_deadline_seconds = 1;
    let proxy = start(&mock, config).await;
    let hub = proxy.runtime.components().subscription_hub();

    let polled = new_filter(&proxy, "newSnapshotBlockFilter", json!([])).await;
    let idle = new_filter(&proxy, "newSnapshotBlockFilter", json!([])).await;

    // Polling pushes the deadline back.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let changes = proxy.call("subscribe_getFilterChanges", json!([polled])).await;
        assert!(changes["result"].is_object(), "{changes}");
    }

    let expired = proxy.call("subscribe_getFilterChanges", json!([idle])).await;
    assert_eq!(expired["error"]["message"], "Filter not found");
    assert_eq!(hub.active_filters(), 1);
    proxy.stop().await;
}

#[tokio::test]
async fn test_account_filter_by_address() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;
    let address = user_address();
    let id = new_filter(&proxy, "newAccountBlockByAddressFilter", json!([address.to_string()])).await;

    let block = |owner: &ViteAddress, height: &str| -> Arc<AccountBlock> {
        Arc::new(
            serde_json::from_value(json!({
                "blockType": 2,
                "height": height,
                "hash": "ab".repeat(32),
                "address": owner.to_string(),
                "toAddress": contract_address().to_string(),
            }))
            .unwrap(),
        )
    };
    let bus = proxy.runtime.components().event_bus();
    bus.publish(ChainEvent::ResolvedAccountBlock { block: block(&contract_address(), "1"), removed: false });
    bus.publish(ChainEvent::ResolvedAccountBlock { block: block(&address, "4"), removed: false });

    let mut result = Value::Null;
    for _ in 0..100 {
        let changes = proxy.call("subscribe_getFilterChanges", json!([id])).await;
        result = changes["result"]["result"].clone();
        if result.as_array().is_some_and(|items| !items.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(result, json!([{ "height": "4", "hash": "ab".repeat(32), "removed": false }]));
    proxy.stop().await;
}

#[tokio::test]
async fn test_filter_argument_errors() {
    let mock = RpcMockBuilder::new().await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    let bad_address = proxy.call("subscribe_newAccountBlockByAddressFilter", json!(["vite_nope"])).await;
    assert_eq!(bad_address["error"]["code"], -32002);

    let not_contract = proxy
        .call(
            "subscribe_createVmLogFilter",
            json!([{ "addressHeightRange": { user_address().to_string(): { "fromHeight": "0", "toHeight": "0" } } }]),
        )
        .await;
    assert_eq!(not_contract["error"]["code"], -32002);
    assert_eq!(not_contract["error"]["message"], "invalid address; Not a contract address");

    let inverted = proxy
        .call(
            "subscribe_createVmLogFilter",
            json!([{ "addressHeightRange": { contract_address().to_string(): { "fromHeight": 9, "toHeight": 3 } } }]),
        )
        .await;
    assert_eq!(inverted["error"]["message"], "to height < from height");

    let unknown = proxy.call("subscribe_newGizmoFilter", json!([])).await;
    assert_eq!(unknown["error"]["code"], -32601);
    assert_eq!(proxy.runtime.components().subscription_hub().active_filters(), 0);
    proxy.stop().await;
}

#[tokio::test]
async fn test_vmlog_filter_reads_the_shared_upstream_subscription() {
    let contract = contract_address();
    let log = json!({
        "vmlog": { "topics": ["cd".repeat(32)], "data": "" },
        "accountBlockHash": "ef".repeat(32),
        "accountBlockHeight": "12",
        "address": contract.to_string(),
        "removed": false,
    });

    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("contract_getContractInfo", &json!({ "code": "YIBgQA==" })).await;
    mock.mock_method("subscribe_newVmLogFilter", &json!("0xfeed")).await;
    mock.mock_method("subscribe_getChangesByFilterId", &json!({ "subscription": "0xfeed", "result": [log] }))
        .await;
    let proxy = start(&mock, test_config(&mock.url())).await;

    let range = |from: u64| json!([{ "addressHeightRange": { contract.to_string(): { "fromHeight": from, "toHeight": 0 } } }]);
    let matching = new_filter(&proxy, "createVmLogFilter", range(10)).await;
    let too_late = new_filter(&proxy, "newVmLogFilter", range(20)).await;

    let hub = proxy.runtime.components().subscription_hub();
    assert_eq!(hub.vmlog_addresses(), vec![contract]);

    let mut result = Value::Null;
    for _ in 0..100 {
        let changes = proxy.call("subscribe_getFilterChanges", json!([matching])).await;
        result = changes["result"]["result"][0].clone();
        if !result.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(result, log);

    let changes = proxy.call("subscribe_getFilterChanges", json!([too_late])).await;
    assert_eq!(changes["result"]["result"], json!([]));
    assert!(eventually(|| hub.active_filters() == 2).await);
    proxy.stop().await;
}
