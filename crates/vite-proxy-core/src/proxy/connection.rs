//! Per-client request context.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{subscription::PushChannel, utils::Deadline};

/// What the router knows about the client behind a request.
///
/// HTTP requests get a fresh connection per request. A WebSocket keeps one for its whole
/// lifetime, so the client key and the vpow key override are fixed at upgrade time.
pub struct ClientConnection {
    client_key: Option<String>,
    vpow_api_key: Option<String>,
    push: Option<PushChannel>,
    heartbeat_enabled: AtomicBool,
    heartbeat: Deadline,
}

impl ClientConnection {
    #[must_use]
    pub fn http(client_key: Option<String>, vpow_api_key: Option<String>) -> Self {
        Self::build(client_key, vpow_api_key, None)
    }

    #[must_use]
    pub fn websocket(
        client_key: Option<String>,
        vpow_api_key: Option<String>,
        push: PushChannel,
    ) -> Self {
        Self::build(client_key, vpow_api_key, Some(push))
    }

    fn build(
        client_key: Option<String>,
        vpow_api_key: Option<String>,
        push: Option<PushChannel>,
    ) -> Self {
        Self {
            client_key,
            vpow_api_key,
            push,
            heartbeat_enabled: AtomicBool::new(false),
            heartbeat: Deadline::new(),
        }
    }

    /// Rate-limit identity, usually the resolved client IP.
    #[must_use]
    pub fn client_key(&self) -> Option<&str> {
        self.client_key.as_deref()
    }

    #[must_use]
    pub fn vpow_api_key(&self) -> Option<&str> {
        self.vpow_api_key.as_deref()
    }

    #[must_use]
    pub fn push(&self) -> Option<&PushChannel> {
        self.push.as_ref()
    }

    #[must_use]
    pub fn is_websocket(&self) -> bool {
        self.push.is_some()
    }

    /// Marks the heartbeat as enabled. Returns `false` if it already was.
    pub(crate) fn enable_heartbeat(&self) -> bool {
        !self.heartbeat_enabled.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn heartbeat_deadline(&self) -> &Deadline {
        &self.heartbeat
    }

    /// Raises the close flag of the push channel, if any.
    pub fn close(&self) {
        if let Some(push) = &self.push {
            push.closed.close();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.heartbeat.cancel();
    }
}
