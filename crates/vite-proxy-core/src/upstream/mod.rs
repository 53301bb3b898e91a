//! Vite nodes behind the proxy.
//!
//! - [`UpstreamNode`]: the call/subscribe seam, implemented by [`HttpNode`] and [`WsNode`]
//! - [`NodePool`]: sync-checked node set with random forwarding and a fixed subscription node
//! - [`ChainFeed`]: turns the subscription node's block notifications into bus events
//!
//! # Routing
//!
//! ```text
//! forwarded call ──► NodePool::random() ──► HttpNode / WsNode
//!
//! subscription node ──► ChainFeed ──► EventBus
//!                  └──► vmlog subscriptions (shared per contract address)
//! ```
//!
//! There is no failover between nodes: a failed forwarded call is reported to the client as
//! is. HTTP nodes emulate subscriptions by polling node-side filters.

pub mod errors;
pub mod feed;
pub mod http_client;
#[cfg(test)]
pub(crate) mod mock;
pub mod node;
pub mod pool;
pub mod websocket;

pub use errors::UpstreamError;
pub use feed::ChainFeed;
pub use http_client::HttpNode;
pub use node::{UpstreamNode, UpstreamSubscription};
pub use pool::{sync_state, NodePool, SYNC_STATE_DONE};
pub use websocket::{WebSocketFailureTracker, WsNode};
