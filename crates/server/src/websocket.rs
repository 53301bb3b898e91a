//! JSON-RPC over WebSocket.
//!
//! Each socket gets one [`ClientConnection`] for its lifetime. Responses and subscription
//! pushes share the connection's outbound channel, and raising its close signal (heartbeat
//! timeout, a dead subscriber) closes the socket.

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};
use url::form_urlencoded;
use vite_proxy_core::{
    proxy::{ClientConnection, MethodRouter},
    subscription::PushChannel,
};

use crate::{app::AppState, middleware::ClientKey, router::VPOW_API_KEY_PARAM};

/// Close code sent when a frame is not valid JSON.
pub const INVALID_REQUEST_CLOSE_CODE: u16 = 1006;
pub const INVALID_REQUEST_REASON: &str = "Invalid request";

/// Upgrades the connection. The client key and the vpow key override are fixed here.
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ClientKey(client_key)): Extension<ClientKey>,
    RawQuery(query): RawQuery,
) -> Response {
    let vpow_api_key = first_query_value(query.as_deref(), VPOW_API_KEY_PARAM);
    ws.on_upgrade(move |socket| serve_socket(socket, state, client_key, vpow_api_key))
}

fn first_query_value(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

async fn serve_socket(
    mut socket: WebSocket,
    state: AppState,
    client_key: Option<String>,
    vpow_api_key: Option<String>,
) {
    let client = client_key.clone().unwrap_or_else(|| "-".to_string());
    info!(client = %client, "websocket connected");
    state.metrics.record_websocket_connection(true);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let push = PushChannel::new(outbound_tx);
    let closed = push.closed.clone();
    let conn = Arc::new(ClientConnection::websocket(client_key, vpow_api_key, push.clone()));
    let mut in_flight = JoinSet::new();

    let close_frame = loop {
        tokio::select! {
            () = closed.closed() => {
                debug!(client = %client, "connection closed by the proxy");
                break None;
            }
            Some(frame) = outbound_rx.recv() => {
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break None;
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            incoming = socket.recv() => {
                let payload = match incoming {
                    Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<Value>(&bytes),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Err(e)) => {
                        debug!(client = %client, error = %e, "websocket receive failed");
                        break None;
                    }
                };
                let Ok(payload) = payload else {
                    break Some(CloseFrame {
                        code: INVALID_REQUEST_CLOSE_CODE,
                        reason: Utf8Bytes::from_static(INVALID_REQUEST_REASON),
                    });
                };
                in_flight.spawn(respond(Arc::clone(&state.router), Arc::clone(&conn), push.clone(), payload));
            }
        }
    };

    if let Some(frame) = close_frame {
        warn!(client = %client, "invalid websocket frame, closing");
        let _ = socket.send(Message::Close(Some(frame))).await;
    } else if closed.is_closed() {
        let _ = socket.send(Message::Close(None)).await;
    }

    // Subscriptions attached to this connection watch the close signal.
    closed.close();
    in_flight.detach_all();
    state.metrics.record_websocket_connection(false);
    info!(client = %client, "websocket closed");
}

async fn respond(
    router: Arc<MethodRouter>,
    conn: Arc<ClientConnection>,
    push: PushChannel,
    payload: Value,
) {
    let frame = match payload {
        Value::Array(batch) => serde_json::to_string(&router.handle_batch(&batch, &conn).await),
        single => serde_json::to_string(&router.handle_value(&single, &conn).await),
    };
    match frame {
        Ok(frame) => {
            push.send(frame);
        }
        Err(e) => warn!(error = %e, "failed to serialize websocket response"),
    }
}
