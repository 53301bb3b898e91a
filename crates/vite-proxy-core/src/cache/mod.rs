//! Snapshot block response cache for the `ledger` namespace.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ResponseCache                         │
//! │   ActionQueue<Value>: one in-flight fetch per height / hash  │
//! └──────────────────────────────────────────────────────────────┘
//!              │                                  │
//!      ┌───────▼────────┐                 ┌───────▼────────┐
//!      │  by_height     │                 │   by_hash      │
//!      │  DashMap<u64>  │                 │ DashMap<String>│
//!      │  TTL eviction  │                 │  TTL eviction  │
//!      └────────────────┘                 └────────────────┘
//! ```
//!
//! A fetch by either index fills both. Entries are logically dead once their TTL has elapsed
//! and are physically removed by a per-entry eviction task.
//!
//! # Warm-up
//!
//! The `ledger` namespace consumes `snapshotBlock` events and prefetches each new block under
//! the by-hash action key, so the first client asking for the tip is usually served from the
//! cache.

pub mod response_cache;

pub use response_cache::{
    block_height, hash_action_key, height_action_key, ResponseCache, ResponseCacheStats,
    SNAPSHOT_BLOCK_TTL,
};
