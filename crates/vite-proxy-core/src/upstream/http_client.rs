use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use super::{
    errors::UpstreamError,
    node::{deliver_items, UpstreamNode, UpstreamSubscription, SUBSCRIPTION_BUFFER},
};
use crate::subscription::topics::Topic;

/// How often a polled upstream filter is drained.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_CONCURRENT_LIMIT: usize = 1000;
const PERMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// RAII guard ensuring semaphore permits are always released.
///
/// Uses [`OwnedSemaphorePermit`] which owns an `Arc` to the semaphore,
/// making it safe to hold across async boundaries.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

/// A Vite node spoken to with JSON-RPC over HTTP POST.
///
/// Subscriptions are emulated by installing a node-side filter and draining it with
/// `subscribe_getChangesByFilterId` on an interval. Cloning is cheap and shares the
/// connection pool.
#[derive(Clone)]
pub struct HttpNode {
    url: Arc<str>,
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    timeout: Duration,
    poll_interval: Duration,
    next_id: Arc<AtomicU64>,
}

impl HttpNode {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(url: impl Into<Arc<str>>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("vite-proxy/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            url: url.into(),
            client,
            concurrent_limit: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_LIMIT)),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Posts a raw JSON-RPC body, retrying server errors and transport failures twice.
    async fn send_request(&self, body: Bytes) -> Result<Bytes, UpstreamError> {
        const MAX_RETRIES: u32 = 2;

        let permit =
            tokio::time::timeout(PERMIT_TIMEOUT, Arc::clone(&self.concurrent_limit).acquire_owned())
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "http client semaphore acquisition timeout");
                    UpstreamError::Timeout
                })?
                .map_err(|_| UpstreamError::ConnectionFailed("client is shutting down".to_string()))?;
        let _permit_guard = PermitGuard::new(permit, Arc::clone(&self.concurrent_limit));

        let mut retries = 0;

        loop {
            let result = self
                .client
                .post(&*self.url)
                .header("content-type", "application/json")
                // Bytes::clone is a refcount bump, so retries never copy the body.
                .body(body.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.bytes().await.map_err(UpstreamError::from);
                    } else if response.status().is_server_error() && retries < MAX_RETRIES {
                        retries += 1;
                        tokio::time::sleep(Duration::from_millis(100 * (1 << retries))).await;
                        continue;
                    }

                    let status = response.status().as_u16();
                    let raw_text = response.text().await.unwrap_or_default();
                    let sanitized_text = if raw_text.len() > 256 {
                        format!("{}... (truncated)", raw_text.chars().take(256).collect::<String>())
                    } else {
                        raw_text
                    };
                    return Err(UpstreamError::HttpError(status, sanitized_text));
                }
                Err(_e) if retries < MAX_RETRIES => {
                    retries += 1;
                    tokio::time::sleep(Duration::from_millis(100 * (1 << retries))).await;
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(UpstreamError::Timeout);
                    }
                    return Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e)));
                }
            }
        }
    }

    async fn poll_filter(self, filter_id: String, sink: mpsc::Sender<Value>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if sink.is_closed() {
                break;
            }
            match self.request("subscribe_getChangesByFilterId", vec![json!(filter_id)]).await {
                Ok(changes) => {
                    let items = changes.get("result").cloned().unwrap_or(Value::Null);
                    if !deliver_items(&sink, items) {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(url = %self.url, filter = %filter_id, error = %e, "filter poll failed");
                }
                Err(e) => {
                    tracing::warn!(
                        url = %self.url,
                        filter = %filter_id,
                        error = %e,
                        "filter poll rejected, ending subscription"
                    );
                    break;
                }
            }
        }
    }
}

/// Extracts `result` from a JSON-RPC response body.
///
/// # Errors
/// An `error` member becomes [`UpstreamError::RpcError`]; a body that is not a JSON object
/// becomes [`UpstreamError::InvalidResponse`].
pub(crate) fn parse_rpc_response(mut response: Value) -> Result<Value, UpstreamError> {
    let Some(object) = response.as_object_mut() else {
        return Err(UpstreamError::InvalidResponse("response is not a JSON object".to_string()));
    };
    if let Some(error) = object.remove("error").filter(|error| !error.is_null()) {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-32603);
        let message =
            error.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_string();
        return Err(UpstreamError::RpcError(code, message));
    }
    Ok(object.remove("result").unwrap_or(Value::Null))
}

#[async_trait]
impl UpstreamNode for HttpNode {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_websocket(&self) -> bool {
        false
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        let raw = self.send_request(Bytes::from(body)).await?;
        let response: Value = serde_json::from_slice(&raw)
            .map_err(|e| UpstreamError::InvalidResponse(format!("invalid JSON: {e}")))?;
        parse_rpc_response(response)
    }

    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<UpstreamSubscription, UpstreamError> {
        let filter_method = Topic::by_name(topic).map(|topic| topic.filter_method).ok_or_else(|| {
            UpstreamError::InvalidResponse(format!("no filter method for topic {topic}"))
        })?;

        let filter_id = self.request(&format!("subscribe_{filter_method}"), params).await?;
        let Some(filter_id) = filter_id.as_str().map(str::to_string) else {
            return Err(UpstreamError::InvalidResponse("filter id is not a string".to_string()));
        };
        tracing::debug!(url = %self.url, topic, filter = %filter_id, "polling upstream filter");

        let (sink, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let poller = tokio::spawn(self.clone().poll_filter(filter_id.clone(), sink));

        let node = self.clone();
        let id = filter_id.clone();
        Ok(UpstreamSubscription::new(filter_id, events, move || {
            poller.abort();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = node.request("subscribe_uninstallFilter", vec![json!(id)]).await {
                        tracing::debug!(filter = %id, error = %e, "failed to uninstall upstream filter");
                    }
                });
            }
        }))
    }
}
