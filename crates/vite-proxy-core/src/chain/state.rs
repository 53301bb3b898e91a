//! Latest snapshot tip as observed on the event feed.
//!
//! `ChainState` is the single source of truth for the height and hash answered by
//! `ledger_getSnapshotChainHeight` and `ledger_getLatestSnapshotHash`. Until the first
//! `snapshotBlock` event arrives it is empty and those methods are forwarded instead.

use arc_swap::ArcSwapOption;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::trace;

/// Snapshot chain tip: height plus the hash of the block at that height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotTip {
    pub height: u64,
    pub hash: String,
}

/// Shared snapshot tip.
///
/// # Thread Safety
///
/// Reads are wait-free `ArcSwap` loads and always see height and hash from the same event.
/// There is one writer, the caching namespace's event loop, so updates need no extra lock.
///
/// # Example
///
/// ```
/// use vite_proxy_core::chain::ChainState;
///
/// let chain_state = ChainState::new();
/// assert!(chain_state.current().is_none());
///
/// chain_state.update(1000, "ab".repeat(32));
/// assert_eq!(chain_state.height(), Some(1000));
/// ```
pub struct ChainState {
    tip: ArcSwapOption<SnapshotTip>,

    /// Unix timestamp (seconds) of the last tip update.
    last_tip_update: AtomicU64,
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl ChainState {
    #[must_use]
    pub fn new() -> Self {
        Self { tip: ArcSwapOption::const_empty(), last_tip_update: AtomicU64::new(0) }
    }

    /// Returns the tip, or `None` before the first event.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<Arc<SnapshotTip>> {
        self.tip.load_full()
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> Option<u64> {
        self.tip.load().as_ref().map(|tip| tip.height)
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> Option<String> {
        self.tip.load().as_ref().map(|tip| tip.hash.clone())
    }

    /// Replaces the tip with the block from the latest `snapshotBlock` event.
    ///
    /// The tip follows the feed verbatim, including lower heights after a rollback.
    pub fn update(&self, height: u64, hash: String) {
        self.tip.store(Some(Arc::new(SnapshotTip { height, hash })));
        self.last_tip_update.store(current_unix_timestamp(), Ordering::Release);
        trace!(height, "snapshot tip updated");
    }

    /// Seconds since the last update, `None` before the first event.
    #[must_use]
    pub fn tip_age_seconds(&self) -> Option<u64> {
        match self.last_tip_update.load(Ordering::Acquire) {
            0 => None,
            last => Some(current_unix_timestamp().saturating_sub(last)),
        }
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}
