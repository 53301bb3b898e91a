use crate::{
    storage::StoreError, types::JsonRpcError, upstream::errors::UpstreamError,
    wallet::WalletError,
};

/// Code used for every namespace-level failure that is not a protocol error.
pub const NAMESPACE_ERROR_CODE: i32 = -32002;

/// Code returned when a rate limit rejects a request.
pub const RATE_LIMIT_ERROR_CODE: i32 = -35005;

pub const METHOD_NOT_FOUND_CODE: i32 = -32601;
pub const INVALID_REQUEST_CODE: i32 = -32600;

/// Errors produced while handling a single JSON-RPC call.
///
/// `Clone` is required because a deduplicated upstream call hands the same outcome to every
/// awaiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("The method {0} does not exist/is not available")]
    MethodNotFound(String),

    /// A protocol error with an explicit code, copied verbatim into the envelope.
    #[error("{message}")]
    Rpc { code: i32, message: String },

    #[error("Rate limit exceeded; please try again later")]
    RateLimited,

    #[error("{0}")]
    NotFound(String),

    #[error("error decrypt store")]
    Crypto,

    /// Preserves the concrete `UpstreamError` so node RPC errors keep their code.
    #[error("UpstreamError: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("StoreError: {0}")]
    Store(String),

    #[error("InternalError: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc { code, message: message.into() }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MethodNotFound(_) => "method_not_found",
            Self::Rpc { .. } => "rpc",
            Self::RateLimited => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::Crypto => "crypto",
            Self::Upstream(_) => "upstream",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }

    /// Converts the error into the wire error object.
    #[must_use]
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, message) = match self {
            Self::MethodNotFound(_) => (METHOD_NOT_FOUND_CODE, self.to_string()),
            Self::Rpc { code, message } => (*code, message.clone()),
            Self::RateLimited => (RATE_LIMIT_ERROR_CODE, self.to_string()),
            Self::Upstream(UpstreamError::RpcError(code, message)) => (*code, message.clone()),
            _ => (NAMESPACE_ERROR_CODE, self.to_string()),
        };
        JsonRpcError { code, message, data: None }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<WalletError> for ProxyError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Decrypt => Self::Crypto,
            WalletError::StoreNotFound => Self::NotFound(err.to_string()),
            WalletError::Locked => Self::NotFound(err.to_string()),
            WalletError::AlreadyExists => Self::rpc(NAMESPACE_ERROR_CODE, err.to_string()),
            WalletError::InvalidMnemonic(_) | WalletError::IndexOutOfRange | WalletError::RangeTooLarge => {
                Self::Validation(err.to_string())
            }
            WalletError::Store(inner) => Self::Store(inner.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
