use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;
use vite_proxy_core::proxy::ClientConnection;

use crate::{app::AppState, middleware::ClientKey};

/// Query parameter overriding the configured vpow key.
pub const VPOW_API_KEY_PARAM: &str = "vpow_api_key";

const NON_STRING_VPOW_KEY: &str = "querystring vpow_api_key must be a string";

/// The query carried `vpow_api_key` as a list or a nested object.
#[derive(Debug, PartialEq, Eq)]
pub struct NonStringQueryParam;

/// Reads the per-request vpow key override.
///
/// A repeated key or a bracketed key (`vpow_api_key[]=...`) is not a plain string.
///
/// # Errors
///
/// Returns [`NonStringQueryParam`] for the forms above.
pub fn vpow_key_override(query: Option<&str>) -> Result<Option<String>, NonStringQueryParam> {
    let mut found = None;
    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        if key == VPOW_API_KEY_PARAM {
            if found.replace(value.into_owned()).is_some() {
                return Err(NonStringQueryParam);
            }
        } else if key.strip_prefix(VPOW_API_KEY_PARAM).is_some_and(|rest| rest.starts_with('[')) {
            return Err(NonStringQueryParam);
        }
    }
    Ok(found)
}

/// Handles JSON-RPC over HTTP POST, single or batched, on any path.
///
/// A body that is not JSON is treated as `null` and fails envelope validation, so the client
/// still gets a JSON-RPC error with status 200.
pub async fn handle_rpc(
    State(state): State<AppState>,
    Extension(ClientKey(client_key)): Extension<ClientKey>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let Ok(vpow_api_key) = vpow_key_override(query.as_deref()) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, NON_STRING_VPOW_KEY).into_response();
    };

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let conn = ClientConnection::http(client_key, vpow_api_key);

    match payload {
        Value::Array(batch) => {
            debug!(client = conn.client_key().unwrap_or("-"), size = batch.len(), "batch request");
            Json(state.router.handle_batch(&batch, &conn).await).into_response()
        }
        single => Json(state.router.handle_value(&single, &conn).await).into_response(),
    }
}

#[allow(clippy::unused_async)]
pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
