//! Proof-of-work support for the vpow namespace.
//!
//! - [`difficulty`]: difficulty/target math and local nonce checks
//! - [`client`]: the remote `generate_work` service

pub mod client;
pub mod difficulty;

pub use client::PowClient;
pub use difficulty::{check_pow_nonce, difficulty_to_target, hash_pow};

use crate::{
    proxy::errors::{ProxyError, NAMESPACE_ERROR_CODE},
    upstream::UpstreamError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PowError {
    #[error("invalid difficulty: {0}")]
    InvalidDifficulty(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The service answered with a non-zero code; the message is shown to the client as is.
    #[error("{0}")]
    Rejected(String),

    #[error("PoW service request failed: {0}")]
    Transport(String),

    #[error("PoW service returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl From<PowError> for ProxyError {
    fn from(err: PowError) -> Self {
        match err {
            PowError::InvalidDifficulty(_) => Self::Validation(err.to_string()),
            PowError::Rejected(message) => Self::rpc(NAMESPACE_ERROR_CODE, message),
            PowError::Transport(message) => Self::Upstream(UpstreamError::Network(message)),
            PowError::InvalidResponse(message) => {
                Self::Upstream(UpstreamError::InvalidResponse(message))
            }
            PowError::InvalidTarget(_) => Self::Internal(err.to_string()),
        }
    }
}
