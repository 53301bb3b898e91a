//! Integration Tests for the Vite RPC Proxy
//!
//! Every test here runs the real runtime, and most of them the real HTTP/WebSocket app on a
//! local port, against mock Vite nodes:
//!
//! - `forwarding_tests`: HTTP JSON-RPC forwarding, batches, headers, client IP resolution
//! - `ledger_cache_tests`: snapshot block caching and the chain tip
//! - `rate_limit_tests`: global limits and their durability across restarts
//! - `wallet_tests`: the wallet namespace end to end
//! - `websocket_tests`: WebSocket requests, heartbeats and push subscriptions
//! - `subscription_tests`: poll filters over HTTP
//! - `chain_feed_tests`: a WebSocket node driving the chain feed
//! - `mock_infrastructure`: Reusable mock nodes and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod forwarding_tests;

#[cfg(test)]
mod ledger_cache_tests;

#[cfg(test)]
mod rate_limit_tests;


#[cfg(test)]
mod websocket_tests;

#[cfg(test)]
mod subscription_tests;

#[cfg(test)]
mod chain_feed_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
