//! In-flight call deduplication.
//!
//! Concurrent callers asking for the same upstream resource share one outstanding call. The
//! ledger cache keys its block fetches here and the subscription hub shares per-address
//! vmlog subscriptions through it.

pub mod action_queue;

pub use action_queue::ActionQueue;
