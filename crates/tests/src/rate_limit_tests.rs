//! Global rate limits through the served app, including restarts on a file database.

use crate::mock_infrastructure::{eventually, test_config, RpcMockBuilder, TestProxy};
use serde_json::json;
use serial_test::serial;
use std::{sync::Arc, time::Duration};
use vite_proxy_core::{
    config::AppConfig,
    storage::{PersistentCounterStore, RateLimitKey},
    upstream::{HttpNode, UpstreamNode},
};

const RATE_LIMITED: i64 = -35005;

async fn peers_node() -> RpcMockBuilder {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_method("net_peers", &json!("peers")).await;
    mock
}

async fn start(mock: &RpcMockBuilder, config: AppConfig) -> TestProxy {
    let node = HttpNode::new(mock.url(), Duration::from_secs(5)).unwrap();
    TestProxy::start(config, Some(vec![Arc::new(node) as Arc<dyn UpstreamNode>])).await
}

fn file_config(mock: &RpcMockBuilder, dir: &tempfile::TempDir, max: u64, window: Duration) -> AppConfig {
    let mut config = test_config(&mock.url());
    config.storage.rate_limit_database_url =
        format!("sqlite://{}", dir.path().join("rate_limits.db").display());
    config.rate_limits.global.max = max;
    config.rate_limits.global.window = window;
    config
}

async fn peers(proxy: &TestProxy) -> serde_json::Value {
    proxy.call("net_peers", json!([])).await
}

#[tokio::test]
async fn test_budget_is_per_window() {
    let mock = peers_node().await;
    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 3;
    let proxy = start(&mock, config).await;

    for _ in 0..3 {
        assert_eq!(peers(&proxy).await["result"], "peers");
    }
    let rejected = peers(&proxy).await;
    assert_eq!(rejected["error"]["code"], RATE_LIMITED);
    assert_eq!(rejected["id"], 1);

    let limiter = proxy.runtime.components().rate_limiter().unwrap();
    assert_eq!(limiter.pending_releases(), 3);
    proxy.stop().await;
}

#[tokio::test]
async fn test_batch_elements_are_charged_individually() {
    let mock = peers_node().await;
    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 2;
    let proxy = start(&mock, config).await;

    let call = |id: u64| json!({ "jsonrpc": "2.0", "id": id, "method": "net_peers", "params": [] });
    let response = proxy.post("/", &json!([call(1), call(2), call(3)])).await;
    let codes: Vec<bool> = response
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["error"]["code"] == RATE_LIMITED)
        .collect();
    assert_eq!(codes.iter().filter(|limited| **limited).count(), 1);
    proxy.stop().await;
}

#[tokio::test]
async fn test_heartbeat_is_not_charged() {
    let mock = peers_node().await;
    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 1;
    let proxy = start(&mock, config).await;

    assert_eq!(peers(&proxy).await["result"], "peers");
    let ping = proxy.call("heartbeat_ping", json!([])).await;
    assert_eq!(ping["error"]["code"], -32002);
    assert_ne!(ping["error"]["code"], RATE_LIMITED);
    proxy.stop().await;
}

#[tokio::test]
async fn test_disabled_module_never_limits() {
    let mock = peers_node().await;
    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 1;
    config.modules.rate_limits = false;
    let proxy = start(&mock, config).await;

    for _ in 0..3 {
        assert_eq!(peers(&proxy).await["result"], "peers");
    }
    assert!(proxy.runtime.components().rate_limiter().is_none());
    proxy.stop().await;
}

#[tokio::test]
#[serial]
async fn test_spent_budget_survives_restart() {
    let mock = peers_node().await;
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&mock, &dir, 2, Duration::from_secs(3600));

    let proxy = start(&mock, config.clone()).await;
    assert_eq!(peers(&proxy).await["result"], "peers");
    assert_eq!(peers(&proxy).await["result"], "peers");
    assert_eq!(peers(&proxy).await["error"]["code"], RATE_LIMITED);
    proxy.stop().await;

    let proxy = start(&mock, config.clone()).await;
    assert_eq!(proxy.runtime.components().rate_limiter().unwrap().pending_releases(), 2);
    assert_eq!(peers(&proxy).await["error"]["code"], RATE_LIMITED);
    proxy.stop().await;

    let store = PersistentCounterStore::open(&config.storage.rate_limit_database_url).await.unwrap();
    let key = RateLimitKey::derive("global", "127.0.0.1");
    assert_eq!(store.count(&key).await.unwrap(), 2);
    assert_eq!(store.pending_entries().await.len(), 2);
}

#[tokio::test]
#[serial]
async fn test_overdue_entries_release_after_restart() {
    let mock = peers_node().await;
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&mock, &dir, 1, Duration::from_millis(300));

    let proxy = start(&mock, config.clone()).await;
    assert_eq!(peers(&proxy).await["result"], "peers");
    proxy.stop().await;

    // The release was cancelled by the shutdown and is overdue by the time we restart.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let proxy = start(&mock, config).await;
    let limiter = proxy.runtime.components().rate_limiter().unwrap();
    assert!(eventually(|| limiter.pending_releases() == 0).await);
    assert_eq!(peers(&proxy).await["result"], "peers");
    proxy.stop().await;
}

#[tokio::test]
#[serial]
async fn test_window_reopens_after_release() {
    let mock = peers_node().await;
    let mut config = test_config(&mock.url());
    config.rate_limits.global.max = 1;
    config.rate_limits.global.window = Duration::from_millis(200);
    let proxy = start(&mock, config).await;

    assert_eq!(peers(&proxy).await["result"], "peers");
    assert_eq!(peers(&proxy).await["error"]["code"], RATE_LIMITED);

    let limiter = proxy.runtime.components().rate_limiter().unwrap();
    assert!(eventually(|| limiter.pending_releases() == 0).await);
    assert_eq!(peers(&proxy).await["result"], "peers");
    proxy.stop().await;
}
