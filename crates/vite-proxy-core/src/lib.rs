//! # vite-proxy core
//!
//! Core library for the vite-proxy JSON-RPC reverse proxy. It sits in front of one or more Vite
//! nodes and adds the pieces a public endpoint needs that a bare node lacks.
//!
//! - **[`proxy`]**: the [`MethodRouter`](proxy::MethodRouter) that validates envelopes,
//!   charges the global rate limit and dispatches each method to its namespace handler or to
//!   the upstream pool.
//!
//! - **[`middleware`]**: envelope and parameter validation, and the
//!   [`RateLimiter`](middleware::RateLimiter) with its delayed releases.
//!
//! - **[`storage`]**: the persistent counter store behind the rate limiter and the wallet
//!   store, both on `SQLite` through `sqlx`.
//!
//! - **[`cache`]**: snapshot block cache indexed by height and by hash.
//!
//! - **[`subscription`]**: the subscription hub that fans chain events out to push and
//!   polling clients.
//!
//! - **[`dedup`]**: the [`ActionQueue`](dedup::ActionQueue) that collapses concurrent calls
//!   for the same key into one.
//!
//! - **[`upstream`]**: HTTP and WebSocket node clients, the node pool and the chain feed.
//!
//! - **[`pow`]** and **[`wallet`]**: proof-of-work nonces through a remote service and
//!   server-side HD wallets.
//!
//! - **[`runtime`]**: builds every component from an [`AppConfig`](config::AppConfig) and
//!   owns their background tasks.
//!
//! ## Architecture
//!
//! ```text
//!        client (HTTP / WebSocket)
//!                  │
//!                  ▼
//!   ┌──────────────────────────────┐
//!   │         MethodRouter         │──── global limit ──► RateLimiter ──► CounterStore
//!   └──────────────┬───────────────┘
//!                  │ longest prefix
//!    ┌──────┬──────┼───────┬──────────┐
//!    ▼      ▼      ▼       ▼          ▼
//! subscribe vpow wallet  ledger   heartbeat      (anything else)
//!    │      │      │       │                           │
//!    ▼      ▼      ▼       ▼                           ▼
//!   Hub  PowClient Store ResponseCache ─── miss ──► NodePool ──► Vite node(s)
//!    ▲                     ▲                            │
//!    │                     │                            │ subscriptions
//!    └──── EventBus ◄──────┴──────── ChainFeed ◄────────┘
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod dedup;
pub mod metrics;
pub mod middleware;
pub mod pow;
pub mod proxy;
pub mod runtime;
pub mod storage;
pub mod subscription;
pub mod types;
pub mod upstream;
pub mod utils;
pub mod wallet;
