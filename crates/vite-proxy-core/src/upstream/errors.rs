use thiserror::Error;

/// Errors that can occur when talking to a Vite node.
///
/// Every variant carries owned strings so the error can be cloned into each awaiter of a
/// deduplicated call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the node.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    ///
    /// First field is the HTTP status code, second is the error message.
    #[error("HTTP error: {0} {1}")]
    HttpError(u16, String),

    /// JSON-RPC error returned by the node.
    ///
    /// Its code and message are passed through to the client untouched.
    #[error("RPC error: {1}")]
    RpcError(i32, String),

    /// Network-level error from the underlying transport.
    #[error("Network error: {0}")]
    Network(String),

    /// Response could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The node closed the WebSocket or the subscription stream.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No node survived the startup sync check.
    #[error("No synced upstream nodes available")]
    NoSyncedNodes,
}

impl UpstreamError {
    /// Returns `true` if reconnecting or retrying on another node could help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout |
            Self::Network(_) |
            Self::ConnectionFailed(_) |
            Self::ConnectionClosed => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for UpstreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::ConnectionClosed,
            WsError::Io(io) => Self::ConnectionFailed(io.to_string()),
            other => Self::Network(other.to_string()),
        }
    }
}
