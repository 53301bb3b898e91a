//! `ActionQueue` coalesces concurrent calls that share a key.
//!
//! # Lifecycle
//!
//! ```text
//! queue_action(key)
//!       │
//!       ▼
//! ┌──────────────────┐  occupied  ┌────────────────────────┐
//! │ in_flight.entry  │ ─────────► │ clone shared outcome   │
//! └────────┬─────────┘            └───────────┬────────────┘
//!          │ vacant                           │
//!          ▼                                  │
//! ┌──────────────────┐                        │
//! │ spawn producer   │                        │
//! │ insert outcome   │                        │
//! └────────┬─────────┘                        │
//!          ▼                                  ▼
//!   producer settles ──► remove(key) ──► every awaiter sees the same Result
//! ```
//!
//! The producer runs on its own task, so it finishes even when every caller has been dropped.
//! Removal happens on the producer task itself, which keeps the entry from outliving the call
//! regardless of whether anyone is still listening.

use crate::proxy::errors::ProxyError;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{future::Future, sync::Arc};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, ProxyError>>>;

/// Deduplicates concurrent calls by key.
///
/// At most one producer runs per key at any time. The entry is removed when the producer
/// settles, successfully or not, so a failure never poisons the next call.
pub struct ActionQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<DashMap<String, SharedOutcome<T>>>,
}

impl<T> ActionQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self { in_flight: Arc::new(DashMap::new()) }
    }

    /// Runs `producer` for `key` unless a call for the same key is already outstanding, in
    /// which case the caller awaits that call's outcome instead.
    ///
    /// # Errors
    ///
    /// Returns whatever the producer fails with. A panicking producer surfaces as
    /// [`ProxyError::Internal`].
    pub async fn queue_action<F, Fut>(&self, key: &str, producer: F) -> Result<T, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProxyError>> + Send + 'static,
    {
        let outcome = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                tracing::trace!(key = %key, "joining in-flight action");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let work = producer();
                let in_flight = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();

                // The shard lock is held until `insert` below, so the removal on the producer
                // task can never run before its own entry exists.
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    in_flight.remove(&owned_key);
                    result
                });

                let outcome = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(ProxyError::Internal(format!("action task failed: {e}"))),
                    }
                }
                .boxed()
                .shared();

                entry.insert(outcome.clone());
                outcome
            }
        };

        outcome.await
    }

    /// Whether a call for `key` is currently outstanding.
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<T> Default for ActionQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
