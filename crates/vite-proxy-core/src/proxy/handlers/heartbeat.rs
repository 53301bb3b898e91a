use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    middleware::validation::{expect_params_between, ValidationError},
    proxy::{connection::ClientConnection, errors::ProxyError, errors::NAMESPACE_ERROR_CODE},
    types::JsonRpcRequest,
};

pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

/// `heartbeat_start` / `heartbeat_ping`: closes a WebSocket that stops pinging.
pub struct HeartbeatHandler {
    timeout: Duration,
}

impl HeartbeatHandler {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// # Errors
    ///
    /// Both methods require a WebSocket connection; unknown methods give -32601.
    pub fn handle(&self, request: &JsonRpcRequest, conn: &ClientConnection) -> Result<Value, ProxyError> {
        match request.action() {
            "start" => self.start(conn),
            "ping" => self.ping(request, conn),
            _ => Err(ProxyError::MethodNotFound(request.method.clone())),
        }
    }

    fn start(&self, conn: &ClientConnection) -> Result<Value, ProxyError> {
        if !conn.is_websocket() {
            return Err(heartbeat_error("Cannot enable heartbeat on a non-websocket connection"));
        }
        if !conn.enable_heartbeat() {
            return Err(heartbeat_error("Heartbeat is already enabled on this connection"));
        }
        self.arm(conn);
        tracing::info!(client = conn.client_key().unwrap_or("-"), "heartbeat enabled");
        Ok(Value::Bool(true))
    }

    fn ping(&self, request: &JsonRpcRequest, conn: &ClientConnection) -> Result<Value, ProxyError> {
        if !conn.is_websocket() {
            return Err(heartbeat_error("Cannot ping a non-websocket connection"));
        }
        if !conn.heartbeat_enabled() {
            return Err(heartbeat_error("Heartbeat is not enabled on this connection"));
        }

        expect_params_between(&request.params, 0, 1)?;
        let sent_at = match request.params.first() {
            Some(_) => Some(timestamp_param(&request.params)?),
            None => None,
        };

        self.arm(conn);
        let now = now_millis();
        tracing::info!(
            client = conn.client_key().unwrap_or("-"),
            latency_ms = sent_at.map(|sent_at| now.saturating_sub(sent_at)),
            "ping"
        );
        Ok(Value::Bool(true))
    }

    fn arm(&self, conn: &ClientConnection) {
        let Some(push) = conn.push() else { return };
        let closed = push.closed.clone();
        let client = conn.client_key().unwrap_or("-").to_string();
        conn.heartbeat_deadline().arm(self.timeout, move |_| async move {
            if closed.close() {
                tracing::info!(client = %client, "heartbeat timed out, closing connection");
            }
        });
    }
}

fn heartbeat_error(message: &str) -> ProxyError {
    ProxyError::rpc(NAMESPACE_ERROR_CODE, message)
}

fn timestamp_param(params: &[Value]) -> Result<i64, ValidationError> {
    params
        .first()
        .and_then(Value::as_u64)
        .and_then(|millis| i64::try_from(millis).ok())
        .ok_or(ValidationError::Param(0, "must be an integer >= 0"))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
