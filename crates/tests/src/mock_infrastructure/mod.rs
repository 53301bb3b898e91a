//! Mock Infrastructure for Testing the Vite RPC Proxy
//!
//! This module provides reusable mock nodes and fixtures for testing the proxy without
//! real Vite nodes.
//!
//! ## Components
//!
//! - `RpcMockBuilder`: Wraps mockito to mock a Vite node over HTTP
//! - `MockViteNode`: A WebSocket Vite node with scripted answers and pushable subscriptions
//! - `TestProxy`: The full app served on a local port
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{test_config, RpcMockBuilder, TestProxy};
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_sync_info(2).await;
//!
//! let proxy = TestProxy::start(test_config(&mock.url()), None).await;
//! let response = proxy.call("net_peers", serde_json::json!([])).await;
//! ```

pub mod rpc_mock;
pub mod test_helpers;
pub mod websocket_mock;

pub use rpc_mock::RpcMockBuilder;
pub use test_helpers::*;
pub use websocket_mock::MockViteNode;
