//! Core type definitions for the JSON-RPC envelope and chain entities.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: Protocol conformance
//! - [`SubscriptionNotification`]: Server-push frame sent to WebSocket subscribers
//!
//! ## Chain Types
//! - [`ChainEvent`]: Events published on the process-wide event bus
//! - [`AccountBlock`]: The subset of a resolved account block the subscription topics read
//!
//! # Performance Notes
//!
//! Request ids are kept behind an `Arc` so the envelope id can be echoed into responses and
//! batch error slots without deep-copying the JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Method name used for server-push subscription frames.
pub const SUBSCRIPTION_NOTIFICATION_METHOD: &str = "subscribe_subscription";

/// JSON-RPC 2.0 request structure after envelope validation.
///
/// # Fields
///
/// - `jsonrpc`: Protocol version (always "2.0")
/// - `method`: RPC method name in `<namespace>_<action>` form (e.g., `ledger_getSnapshotBlockByHeight`)
/// - `params`: Positional parameters, defaulted to an empty array
/// - `id`: Request identifier that must be echoed in the response
///
/// # Example
///
/// ```
/// use vite_proxy_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("ledger_getSnapshotChainHeight", vec![], json!(1));
///
/// assert_eq!(request.method, "ledger_getSnapshotChainHeight");
/// assert_eq!(request.namespace(), "ledger");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: Arc<Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }

    /// Builds an internal request that reuses this request's id.
    #[must_use]
    pub fn derive(&self, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            method: method.into(),
            params,
            id: Arc::clone(&self.id),
        }
    }

    /// First underscore-delimited segment of the method name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.method.split('_').next().unwrap_or_default()
    }

    /// Second underscore-delimited segment, used by namespace dispatch tables.
    #[must_use]
    pub fn action(&self) -> &str {
        self.method.split('_').nth(1).unwrap_or_default()
    }
}

/// JSON-RPC 2.0 response structure.
///
/// A response contains either a `result` (success) or an `error` (failure), never both.
/// A successful `null` result is still serialized as `"result": null`.
///
/// # Example
///
/// ```
/// use vite_proxy_core::types::JsonRpcResponse;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let response = JsonRpcResponse::success(json!("1024"), Arc::new(json!(1)));
/// assert!(response.result.is_some());
///
/// let response = JsonRpcResponse::error(-32601, "Method not found".to_string(), Arc::new(json!(1)));
/// assert!(response.error.is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<Value>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    #[must_use]
    pub fn success(result: Value, id: Arc<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error JSON-RPC response.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }

    /// Wraps an already-built error object.
    #[must_use]
    pub fn from_error(error: JsonRpcError, id: Arc<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: None, error: Some(error), id }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object.
///
/// Codes used by the proxy:
///
/// - `-32600`: Invalid subscription bootstrap (no notifier available)
/// - `-32601`: Method or subscription topic not found
/// - `-32002`: Namespace-level error (validation, store not found, decrypt failure, ...)
/// - `-35005`: Rate limit exceeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-push frame for an active subscription.
///
/// Serializes as
/// `{"jsonrpc":"2.0","method":"subscribe_subscription","params":{"subscription":id,"result":[payload]}}`.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: SubscriptionNotificationParams<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionNotificationParams<'a> {
    pub subscription: &'a str,
    pub result: [&'a Value; 1],
}

impl<'a> SubscriptionNotification<'a> {
    #[must_use]
    pub fn new(subscription: &'a str, payload: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: SUBSCRIPTION_NOTIFICATION_METHOD,
            params: SubscriptionNotificationParams { subscription, result: [payload] },
        }
    }
}

/// Account block type codes as reported by Vite nodes.
pub mod block_type {
    pub const GENESIS_RECEIVE: u8 = 1;
    pub const RECEIVE: u8 = 4;
    pub const RECEIVE_ERROR: u8 = 5;

    /// Receive-side blocks never show up in unreceived-block topics.
    #[must_use]
    pub fn is_receive_kind(block_type: u8) -> bool {
        matches!(block_type, GENESIS_RECEIVE | RECEIVE | RECEIVE_ERROR)
    }
}

/// Fields of a resolved account block read by the address-scoped subscription topics.
///
/// Unknown fields are kept in `extra` so the full block survives a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBlock {
    #[serde(default)]
    pub block_type: u8,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub receive_block_hash: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AccountBlock {
    /// Whether the send block has already been received on the other side.
    #[must_use]
    pub fn is_received(&self) -> bool {
        self.receive_block_hash.as_deref().is_some_and(|hash| !hash.is_empty())
    }
}

/// Events published on the process-wide event bus.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A new canonical snapshot block (or the removal of one during a rollback).
    SnapshotBlock { height: u64, hash: String, removed: bool },
    /// A new account block notification, before resolution.
    AccountBlock { hash: String, removed: bool },
    /// The same account block after `ledger_getAccountBlockByHash`.
    ResolvedAccountBlock { block: Arc<AccountBlock>, removed: bool },
}
