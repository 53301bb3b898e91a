use crate::{dedup::ActionQueue, metrics::MetricsCollector, proxy::errors::ProxyError};
use dashmap::DashMap;
use serde_json::Value;
use std::{
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// Default lifetime of a cached snapshot block.
pub const SNAPSHOT_BLOCK_TTL: Duration = Duration::from_millis(60_000);

const HEIGHT_KEY_PREFIX: &str = "get_snapshot_block_by_height";
const HASH_KEY_PREFIX: &str = "get_snapshot_block_by_hash";

/// `ActionQueue` key for a by-height fetch.
#[must_use]
pub fn height_action_key(height: u64) -> String {
    format!("{HEIGHT_KEY_PREFIX}:{height}")
}

/// `ActionQueue` key for a by-hash fetch.
#[must_use]
pub fn hash_action_key(hash: &str) -> String {
    format!("{HASH_KEY_PREFIX}:{hash}")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    created_at: Instant,
    seq: u64,
}

/// One TTL index. Each insert schedules its own eviction, and an eviction only removes the
/// entry it was scheduled for, so a refreshed entry keeps its full lifetime.
struct TtlIndex<K> {
    entries: Arc<DashMap<K, CacheEntry>>,
}

impl<K> TtlIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }

    fn get(&self, key: &K, ttl: Duration) -> Option<Arc<Value>> {
        let entry = self.entries.get(key)?;
        // Logically dead even if the eviction timer has not run yet.
        if entry.created_at.elapsed() >= ttl {
            return None;
        }
        Some(Arc::clone(&entry.value))
    }

    fn insert(&self, key: K, value: Arc<Value>, seq: u64, ttl: Duration) {
        self.entries.insert(key.clone(), CacheEntry { value, created_at: Instant::now(), seq });

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            entries.remove_if(&key, |_, entry| entry.seq == seq);
        });
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

struct SnapshotIndexes {
    by_height: TtlIndex<u64>,
    by_hash: TtlIndex<String>,
    ttl: Duration,
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SnapshotIndexes {
    fn lookup_height(&self, height: u64) -> Option<Value> {
        let hit = self.by_height.get(&height, self.ttl);
        self.record(hit.is_some(), "by_height");
        hit.map(|value| (*value).clone())
    }

    fn lookup_hash(&self, hash: &str) -> Option<Value> {
        let hit = self.by_hash.get(&hash.to_string(), self.ttl);
        self.record(hit.is_some(), "by_hash");
        hit.map(|value| (*value).clone())
    }

    fn record(&self, hit: bool, index: &'static str) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(metrics) = &self.metrics {
            if hit {
                metrics.record_cache_hit(index);
            } else {
                metrics.record_cache_miss(index);
            }
        }
    }

    /// Fills both indexes from one block. Returns `false` when the block lacks a usable
    /// height or hash.
    fn store(&self, block: &Value) -> bool {
        let (Some(height), Some(hash)) = (block_height(block), block_hash(block)) else {
            return false;
        };

        let value = Arc::new(block.clone());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.by_height.insert(height, Arc::clone(&value), seq, self.ttl);
        self.by_hash.insert(hash.to_string(), value, seq, self.ttl);
        trace!(height, hash = %hash, "cached snapshot block");
        true
    }
}

/// Snapshot block height, accepted as a decimal string or a number.
#[must_use]
pub fn block_height(block: &Value) -> Option<u64> {
    match block.get("height")? {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

fn block_hash(block: &Value) -> Option<&str> {
    block.get("hash")?.as_str().filter(|hash| !hash.is_empty())
}

/// Hit/miss counters and index sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub by_height_entries: usize,
    pub by_hash_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache of snapshot blocks indexed by height and by hash.
///
/// Every fetch goes through the [`ActionQueue`]: concurrent misses for the same height (or
/// hash) share a single upstream call, and the cache is re-checked inside the queued action so
/// a caller arriving just after a fill never refetches. A successful fetch fills both indexes
/// and both entries expire after the TTL. A `null` upstream answer is passed through but not
/// cached.
pub struct ResponseCache {
    indexes: Arc<SnapshotIndexes>,
    actions: ActionQueue<Value>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, None)
    }

    #[must_use]
    pub fn with_metrics(ttl: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self::build(ttl, Some(metrics))
    }

    fn build(ttl: Duration, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            indexes: Arc::new(SnapshotIndexes {
                by_height: TtlIndex::new(),
                by_hash: TtlIndex::new(),
                ttl,
                next_seq: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                metrics,
            }),
            actions: ActionQueue::new(),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.indexes.ttl
    }

    /// Cached block at `height`, if live.
    #[must_use]
    pub fn get_by_height(&self, height: u64) -> Option<Value> {
        self.indexes.by_height.get(&height, self.indexes.ttl).map(|value| (*value).clone())
    }

    /// Cached block with `hash`, if live.
    #[must_use]
    pub fn get_by_hash(&self, hash: &str) -> Option<Value> {
        self.indexes.by_hash.get(&hash.to_string(), self.indexes.ttl).map(|value| (*value).clone())
    }

    /// Inserts a block directly. Returns `false` if it has no parseable height or hash.
    pub fn insert(&self, block: &Value) -> bool {
        self.indexes.store(block)
    }

    /// Returns the block at `height`, calling `fetch` on a miss.
    ///
    /// # Errors
    /// Returns the fetch error; every caller sharing the in-flight fetch receives it.
    pub async fn snapshot_block_by_height<F, Fut>(
        &self,
        height: u64,
        fetch: F,
    ) -> Result<Value, ProxyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ProxyError>> + Send + 'static,
    {
        let indexes = Arc::clone(&self.indexes);
        let key = height_action_key(height);
        self.actions
            .queue_action(&key, move || async move {
                if let Some(block) = indexes.lookup_height(height) {
                    debug!(key = %height_action_key(height), "cache hit");
                    return Ok(block);
                }
                let block = fetch().await?;
                if !block.is_null() {
                    indexes.store(&block);
                }
                Ok(block)
            })
            .await
    }

    /// Returns the block with `hash`, calling `fetch` on a miss.
    ///
    /// # Errors
    /// Returns the fetch error; every caller sharing the in-flight fetch receives it.
    pub async fn snapshot_block_by_hash<F, Fut>(
        &self,
        hash: &str,
        fetch: F,
    ) -> Result<Value, ProxyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ProxyError>> + Send + 'static,
    {
        let indexes = Arc::clone(&self.indexes);
        let owned_hash = hash.to_string();
        self.actions
            .queue_action(&hash_action_key(hash), move || async move {
                if let Some(block) = indexes.lookup_hash(&owned_hash) {
                    debug!(key = %hash_action_key(&owned_hash), "cache hit");
                    return Ok(block);
                }
                let block = fetch().await?;
                if !block.is_null() {
                    indexes.store(&block);
                }
                Ok(block)
            })
            .await
    }

    /// Runs `work` under the by-hash key of `hash`, so a concurrent by-hash lookup for the same
    /// block joins it instead of issuing its own fetch.
    ///
    /// # Errors
    /// Returns whatever `work` fails with.
    pub async fn under_hash_key<F, Fut>(&self, hash: &str, work: F) -> Result<Value, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ProxyError>> + Send + 'static,
    {
        self.actions.queue_action(&hash_action_key(hash), work).await
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            by_height_entries: self.indexes.by_height.len(),
            by_hash_entries: self.indexes.by_hash.len(),
            hits: self.indexes.hits.load(Ordering::Relaxed),
            misses: self.indexes.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.indexes.by_height.clear();
        self.indexes.by_hash.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(SNAPSHOT_BLOCK_TTL)
    }
}
