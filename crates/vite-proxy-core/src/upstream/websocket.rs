use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{
    errors::UpstreamError,
    http_client::parse_rpc_response,
    node::{deliver_items, UpstreamNode, UpstreamSubscription, SUBSCRIPTION_BUFFER},
};
use crate::types::SUBSCRIPTION_NOTIFICATION_METHOD;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tracks WebSocket connection failures to avoid endless retry loops.
///
/// After `max_consecutive_failures` failures in a row the node fails fast until
/// `failure_reset_duration` has passed since the last failure.
#[derive(Debug)]
pub struct WebSocketFailureTracker {
    consecutive_failures: u32,
    last_failure_time: Instant,
    max_consecutive_failures: u32,
    failure_reset_duration: Duration,
    permanently_failed: bool,
}

impl Default for WebSocketFailureTracker {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_time: Instant::now(),
            max_consecutive_failures: 3,
            failure_reset_duration: Duration::from_secs(60),
            permanently_failed: false,
        }
    }
}

impl WebSocketFailureTracker {
    /// Records a connection failure, marking the node failed at twice the threshold.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure_time = Instant::now();

        if self.consecutive_failures >= self.max_consecutive_failures * 2 {
            self.permanently_failed = true;
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.permanently_failed = false;
    }

    #[must_use]
    pub fn should_stop_retrying(&self) -> bool {
        if self.permanently_failed {
            return true;
        }

        self.consecutive_failures >= self.max_consecutive_failures &&
            self.last_failure_time.elapsed() < self.failure_reset_duration
    }

    /// Clears the failure state once the cooldown has elapsed.
    pub fn reset_if_expired(&mut self) {
        if self.consecutive_failures >= self.max_consecutive_failures &&
            self.last_failure_time.elapsed() >= self.failure_reset_duration
        {
            self.consecutive_failures = 0;
            self.permanently_failed = false;
        }
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

enum Pending {
    Call(oneshot::Sender<Result<Value, UpstreamError>>),
    /// A `subscribe_subscribe` call; the sink is registered before the reply is released so
    /// no notification can slip in between.
    Subscribe(oneshot::Sender<Result<Value, UpstreamError>>, mpsc::Sender<Value>),
}

/// One open socket with its request and subscription routing tables.
struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: DashMap<u64, Pending>,
    subscriptions: DashMap<String, mpsc::Sender<Value>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    fn send_frame(&self, frame: &Value) -> Result<(), UpstreamError> {
        self.outbound
            .send(Message::Text(frame.to_string().into()))
            .map_err(|_| UpstreamError::ConnectionClosed)
    }

    fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.remove(subscription_id);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "subscribe_unsubscribe",
            "params": [subscription_id],
        });
        // Nobody waits for the reply; an unknown id is ignored by the reader.
        let _ = self.send_frame(&frame);
    }

    fn dispatch(&self, text: &str) {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            tracing::warn!(message = text, "failed to parse websocket message");
            return;
        };

        if message.get("method").and_then(Value::as_str) == Some(SUBSCRIPTION_NOTIFICATION_METHOD) {
            self.route_notification(message);
            return;
        }

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return;
        };
        let Some((_, pending)) = self.pending.remove(&id) else {
            return;
        };
        let outcome = parse_rpc_response(message);
        match pending {
            Pending::Call(reply) => {
                let _ = reply.send(outcome);
            }
            Pending::Subscribe(reply, sink) => {
                let subscription_id = match &outcome {
                    Ok(Value::String(subscription_id)) => Some(subscription_id.clone()),
                    _ => None,
                };
                if let Some(subscription_id) = &subscription_id {
                    self.subscriptions.insert(subscription_id.clone(), sink);
                    tracing::debug!(subscription = %subscription_id, "upstream subscription confirmed");
                }
                if reply.send(outcome).is_err() {
                    // The caller timed out; do not leak the node-side subscription.
                    if let Some(subscription_id) = subscription_id {
                        self.unsubscribe(&subscription_id);
                    }
                }
            }
        }
    }

    fn route_notification(&self, mut message: Value) {
        let Some(params) = message.get_mut("params") else {
            return;
        };
        let Some(subscription_id) =
            params.get("subscription").and_then(Value::as_str).map(str::to_string)
        else {
            return;
        };
        let result = params.get_mut("result").map(Value::take).unwrap_or(Value::Null);

        let delivered = match self.subscriptions.get(&subscription_id) {
            Some(sink) => deliver_items(&sink, result),
            None => {
                tracing::trace!(subscription = %subscription_id, "notification for unknown subscription");
                return;
            }
        };
        if !delivered {
            self.unsubscribe(&subscription_id);
        }
    }

    /// Fails every outstanding call and ends every subscription stream.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let reply = match pending {
                    Pending::Call(reply) | Pending::Subscribe(reply, _) => reply,
                };
                let _ = reply.send(Err(UpstreamError::ConnectionClosed));
            }
        }
        self.subscriptions.clear();
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// A Vite node reached over a persistent WebSocket.
///
/// The socket is opened lazily and reopened on the next call after it drops. Subscriptions do
/// not survive a reconnect: their event streams end and the owner resubscribes.
pub struct WsNode {
    url: Arc<str>,
    timeout: Duration,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    failure_tracker: parking_lot::Mutex<WebSocketFailureTracker>,
}

impl WsNode {
    #[must_use]
    pub fn new(url: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            connection: tokio::sync::Mutex::new(None),
            failure_tracker: parking_lot::Mutex::new(WebSocketFailureTracker::default()),
        }
    }

    /// Creates the node and opens its socket right away.
    ///
    /// # Errors
    /// Returns the connection error if the handshake fails.
    pub async fn connect(url: impl Into<Arc<str>>, timeout: Duration) -> Result<Self, UpstreamError> {
        let node = Self::new(url, timeout);
        node.connection().await?;
        Ok(node)
    }

    /// Whether a socket is currently open.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| !connection.closed.load(Ordering::Acquire))
    }

    async fn connection(&self) -> Result<Arc<Connection>, UpstreamError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref().filter(|c| !c.closed.load(Ordering::Acquire)) {
            return Ok(Arc::clone(connection));
        }

        {
            let mut tracker = self.failure_tracker.lock();
            tracker.reset_if_expired();
            if tracker.should_stop_retrying() {
                return Err(UpstreamError::ConnectionFailed(format!(
                    "websocket {} is cooling down after {} failures",
                    self.url,
                    tracker.failure_count()
                )));
            }
        }

        let stream = match self.connect_websocket().await {
            Ok(stream) => {
                self.failure_tracker.lock().record_success();
                stream
            }
            Err(e) => {
                self.failure_tracker.lock().record_failure();
                return Err(e);
            }
        };

        let (write, read) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            outbound,
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(Arc::clone(&connection), read, Arc::clone(&self.url)));

        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Opens the socket, turning common handshake failures into readable errors.
    async fn connect_websocket(&self) -> Result<WsStream, UpstreamError> {
        tracing::info!(url = %self.url, "connecting to websocket");

        let connect = tokio_tungstenite::connect_async(&*self.url);
        let result = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| UpstreamError::Timeout)?;

        match result {
            Ok((stream, response)) => {
                tracing::info!(
                    url = %self.url,
                    status = response.status().as_u16(),
                    "websocket connected successfully"
                );
                Ok(stream)
            }
            Err(e) => {
                let error_msg = e.to_string();
                tracing::error!(url = %self.url, error = %e, "websocket connection failed");

                if error_msg.contains("HTTP error: 200 OK") {
                    Err(UpstreamError::ConnectionFailed(format!(
                        "{} returned 200 OK but does not speak WebSocket",
                        self.url
                    )))
                } else if error_msg.contains("HTTP error: 403") {
                    Err(UpstreamError::ConnectionFailed(format!(
                        "WebSocket access forbidden for {} (403 Forbidden)",
                        self.url
                    )))
                } else {
                    Err(UpstreamError::ConnectionFailed(format!("WebSocket connection failed: {e}")))
                }
            }
        }
    }

    async fn call_on(
        &self,
        connection: &Arc<Connection>,
        method: &str,
        params: Vec<Value>,
        sink: Option<mpsc::Sender<Value>>,
    ) -> Result<Value, UpstreamError> {
        let id = connection.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        let pending = match sink {
            Some(sink) => Pending::Subscribe(reply, sink),
            None => Pending::Call(reply),
        };
        connection.pending.insert(id, pending);

        // The reader may have shut down before the insert above landed.
        if connection.closed.load(Ordering::Acquire) {
            connection.pending.remove(&id);
            return Err(UpstreamError::ConnectionClosed);
        }

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = connection.send_frame(&frame) {
            connection.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(UpstreamError::ConnectionClosed),
            Err(_) => {
                connection.pending.remove(&id);
                Err(UpstreamError::Timeout)
            }
        }
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::debug!(error = %e, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(connection: Arc<Connection>, mut read: SplitStream<WsStream>, url: Arc<str>) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => connection.dispatch(&text),
            Ok(Message::Close(_)) => {
                tracing::warn!(url = %url, "websocket connection closed");
                break;
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }
    connection.shutdown();
}

#[async_trait]
impl UpstreamNode for WsNode {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_websocket(&self) -> bool {
        true
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, UpstreamError> {
        let connection = self.connection().await?;
        self.call_on(&connection, method, params, None).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<UpstreamSubscription, UpstreamError> {
        let connection = self.connection().await?;
        let (sink, events) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let mut call_params = Vec::with_capacity(params.len() + 1);
        call_params.push(json!(topic));
        call_params.extend(params);

        let id = self.call_on(&connection, "subscribe_subscribe", call_params, Some(sink)).await?;
        let Some(id) = id.as_str().map(str::to_string) else {
            return Err(UpstreamError::InvalidResponse("subscription id is not a string".to_string()));
        };

        let closer_id = id.clone();
        Ok(UpstreamSubscription::new(id, events, move || connection.unsubscribe(&closer_id)))
    }
}
