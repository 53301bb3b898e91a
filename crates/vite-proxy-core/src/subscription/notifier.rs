//! Where subscription payloads go.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::{types::SubscriptionNotification, utils::Deadline};

/// One-way close flag shared by everything attached to a connection or filter.
#[derive(Clone, Debug)]
pub struct CloseSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    #[must_use]
    pub fn new() -> Self {
        Self { sender: Arc::new(watch::Sender::new(false)) }
    }

    /// Raises the flag. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.sender.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the flag is raised.
    pub async fn closed(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound side of a WebSocket connection: serialized frames plus its close flag.
#[derive(Clone, Debug)]
pub struct PushChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub closed: CloseSignal,
}

impl PushChannel {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { outbound, closed: CloseSignal::new() }
    }

    /// Queues a frame. A failed send means the socket is gone, which closes the channel.
    pub fn send(&self, frame: String) -> bool {
        if self.outbound.send(frame).is_ok() {
            true
        } else {
            self.closed.close();
            false
        }
    }
}

/// Poll-mode subscription: payloads accumulate until the next `getFilterChanges`.
pub struct FilterSubscription {
    id: String,
    cache: Mutex<Vec<Value>>,
    pub(crate) deadline: Deadline,
    closed: CloseSignal,
}

impl FilterSubscription {
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, cache: Mutex::new(Vec::new()), deadline: Deadline::new(), closed: CloseSignal::new() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push(&self, payload: Value) {
        self.cache.lock().push(payload);
    }

    /// Takes every cached payload, oldest first.
    pub fn drain(&self) -> Vec<Value> {
        std::mem::take(&mut *self.cache.lock())
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.cache.lock().len()
    }

    /// Stops the listeners and the deadline. Returns `true` the first time.
    pub fn close(&self) -> bool {
        self.deadline.cancel();
        self.closed.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

/// Destination of one subscription's payloads.
#[derive(Clone)]
pub enum Notifier {
    Push(PushChannel),
    Filter(Arc<FilterSubscription>),
}

impl Notifier {
    /// Delivers one payload for `subscription`.
    pub fn notify(&self, subscription: &str, payload: &Value) {
        match self {
            Self::Push(channel) => match serde_json::to_string(&SubscriptionNotification::new(subscription, payload)) {
                Ok(frame) => {
                    channel.send(frame);
                }
                Err(e) => tracing::error!(subscription, error = %e, "failed to encode notification"),
            },
            Self::Filter(filter) => filter.push(payload.clone()),
        }
    }

    /// The flag whose raising tears the subscription down.
    #[must_use]
    pub fn close_signal(&self) -> &CloseSignal {
        match self {
            Self::Push(channel) => &channel.closed,
            Self::Filter(filter) => &filter.closed,
        }
    }
}
