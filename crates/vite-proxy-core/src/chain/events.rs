//! Process-wide chain event bus.
//!
//! One [`ChainFeed`](crate::upstream::feed::ChainFeed) publishes; the caching namespace and the
//! subscription hub each hold their own receiver. A receiver that falls behind by more than
//! [`EVENT_BUS_CAPACITY`] events skips ahead and logs the gap.

use crate::types::ChainEvent;
use tokio::sync::broadcast::{self, error::RecvError};

pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes `event` to every current receiver. Returns the number of receivers.
    pub fn publish(&self, event: ChainEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { inner: self.sender.subscribe() }
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half that absorbs lag instead of surfacing it.
pub struct EventReceiver {
    inner: broadcast::Receiver<ChainEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ChainEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged; dropping oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
