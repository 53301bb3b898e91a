//! Cancellable, re-armable one-shot timers.
//!
//! A [`Deadline`] owns at most one pending timer. Arming it again replaces the previous timer,
//! and a generation counter makes any superseded timer a no-op even if its task already woke
//! up. Each armed timer fires at most once. The callback receives a [`Firing`] token so work it
//! does under another lock can re-check that no re-arm raced with it.

use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

/// Issued to a fired callback. Stays current until the deadline is re-armed or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing(u64);

pub struct Deadline {
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Deadline {
    #[must_use]
    pub fn new() -> Self {
        Self { generation: Arc::new(AtomicU64::new(0)), task: Mutex::new(None) }
    }

    /// Schedules `on_fire` to run once after `after`, replacing any pending timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, after: Duration, on_fire: F)
    where
        F: FnOnce(Firing) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock();
        let armed_at = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let generation = Arc::clone(&self.generation);
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Claim the firing slot; a concurrent re-arm or cancel bumps the generation first.
            if generation
                .compare_exchange(armed_at, armed_at + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Detached so the callback may cancel or re-arm this deadline safely.
                tokio::spawn(on_fire(Firing(armed_at + 1)));
            }
        }));
    }

    /// Cancels the pending timer, if any. Returns `true` when a timer was still pending.
    pub fn cancel(&self) -> bool {
        let mut task = self.task.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        match task.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Whether `firing` is still the latest event on this deadline.
    #[must_use]
    pub fn is_current(&self, firing: Firing) -> bool {
        self.generation.load(Ordering::Acquire) == firing.0
    }

    /// Whether a timer is armed and has not fired or been cancelled.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
