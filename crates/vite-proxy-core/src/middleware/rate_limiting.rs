use crate::{
    metrics::MetricsCollector,
    proxy::errors::ProxyError,
    storage::{ExpiryEntry, PersistentCounterStore, RateLimitKey},
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// Fixed-window admission budget: at most `max` admissions per key within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub max: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Limit {
    #[must_use]
    pub const fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Persistent sliding-release rate limiter.
///
/// Every admission increments a durable counter and appends an expiry entry; a release task
/// scheduled for the entry's `expire_at` undoes both. Because pending entries are on disk,
/// [`restore`](Self::restore) can reschedule them after a restart, so a window that was open
/// when the process stopped is neither dropped nor extended indefinitely.
pub struct RateLimiter {
    store: Arc<PersistentCounterStore>,
    releases: Arc<DashMap<[u8; 8], JoinHandle<()>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<PersistentCounterStore>) -> Self {
        Self { store, releases: Arc::new(DashMap::new()), metrics: None }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Admits one call for `client_key` under `namespace` or rejects it.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::RateLimited`] when the key already holds `limit.max` pending admissions
    /// - [`ProxyError::Store`] if the store transaction fails
    pub async fn consume(
        &self,
        namespace: &str,
        client_key: &str,
        limit: Limit,
    ) -> Result<(), ProxyError> {
        let key = RateLimitKey::derive(namespace, client_key);
        let expire_at = now_millis().saturating_add(duration_millis(limit.window));

        match self.store.admit(&key, limit.max, expire_at).await? {
            Some(entry) => {
                self.schedule_release(entry, limit.window);
                Ok(())
            }
            None => {
                tracing::debug!(namespace = %namespace, client = %client_key, "rate limit exceeded");
                if let Some(metrics) = &self.metrics {
                    metrics.record_rate_limit_rejection(namespace);
                }
                Err(ProxyError::RateLimited)
            }
        }
    }

    /// Reschedules every pending release found in the store, firing overdue ones immediately.
    ///
    /// Returns the number of releases scheduled.
    pub async fn restore(&self) -> usize {
        let pending = self.store.pending_entries().await;
        let now = now_millis();

        for entry in &pending {
            let remaining = u64::try_from(entry.expire_at.saturating_sub(now)).unwrap_or(0);
            self.schedule_release(*entry, Duration::from_millis(remaining));
        }

        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "restored pending rate limit releases");
        }
        pending.len()
    }

    /// Number of release tasks not yet completed.
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    /// Aborts every scheduled release. Persisted entries stay on disk for the next start.
    pub fn shutdown(&self) {
        self.releases.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    fn schedule_release(&self, entry: ExpiryEntry, delay: Duration) {
        if let Entry::Vacant(slot) = self.releases.entry(entry.id) {
            let store = Arc::clone(&self.store);
            let releases = Arc::clone(&self.releases);

            // The slot's shard lock is held until `insert`, so the task's removal always
            // targets its own handle.
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match store.release(&entry.id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::trace!(id = %entry.id_hex(), "expiry entry already released");
                    }
                    Err(e) => {
                        tracing::error!(id = %entry.id_hex(), error = %e, "failed to release rate limit entry");
                    }
                }
                releases.remove(&entry.id);
            });
            slot.insert(handle);
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
