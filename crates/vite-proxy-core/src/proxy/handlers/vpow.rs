use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    middleware::{
        rate_limiting::Limit,
        validation::{hash_param, string_param, ValidationError},
    },
    pow::{check_pow_nonce, difficulty::parse_difficulty, difficulty_to_target, PowClient, PowError},
    proxy::{connection::ClientConnection, engine::SharedContext, errors::ProxyError},
    types::JsonRpcRequest,
};

/// Rate-limit namespace for nonces paid with the proxy's own key.
pub const VPOW_LIMIT: &str = "vpow";

/// Serves `util_getPoWNonce` and `pow_getPowNonce` from the remote PoW service; every other
/// method it is registered for is forwarded.
pub struct VpowHandler {
    ctx: Arc<SharedContext>,
    client: PowClient,
    api_key: String,
    limit: Limit,
}

impl VpowHandler {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>, client: PowClient, api_key: String, limit: Limit) -> Self {
        Self { ctx, client, api_key, limit }
    }

    /// # Errors
    ///
    /// Validation, rate-limit and PoW service errors, or the forwarded call's error.
    pub async fn handle(&self, request: &JsonRpcRequest, conn: &ClientConnection) -> Result<Value, ProxyError> {
        match request.method.as_str() {
            "util_getPoWNonce" | "pow_getPowNonce" => self.get_pow_nonce(request, conn).await,
            _ => self.ctx.forward_to_upstream(request).await,
        }
    }

    /// `[difficulty, hash]`: the nonce for `hash`, base64 encoded. Work that misses the
    /// target is not passed on.
    async fn get_pow_nonce(&self, request: &JsonRpcRequest, conn: &ClientConnection) -> Result<Value, ProxyError> {
        let difficulty = string_param(&request.params, 0)?;
        let difficulty = parse_difficulty(difficulty)
            .map_err(|_| ValidationError::Param(0, "must be a decimal string"))?;
        let hash = hash_param(&request.params, 1)?;
        let data = hex::decode(hash).map_err(|_| ValidationError::Param(1, "must be a 64 character lowercase hex hash"))?;
        let threshold = difficulty_to_target(&difficulty);

        // Only nonces paid with the proxy's own key are rate limited.
        let api_key = conn.vpow_api_key().unwrap_or(&self.api_key);
        if api_key == self.api_key && self.ctx.limiter.is_some() {
            let Some(client_key) = conn.client_key() else {
                return Err(ProxyError::Internal("rateLimitKey is undefined".to_string()));
            };
            self.ctx.consume(VPOW_LIMIT, Some(client_key), self.limit).await?;
        }

        tracing::debug!(hash, threshold = %threshold, own_key = api_key == self.api_key, "requesting pow nonce");
        let nonce = self.client.generate_work(api_key, hash, &threshold).await?;
        if !check_pow_nonce(&threshold, &nonce, &data)? {
            tracing::warn!(hash, threshold = %threshold, "pow service returned work below the target");
            return Err(PowError::InvalidResponse("work does not meet the target".to_string()).into());
        }
        Ok(Value::String(STANDARD.encode(nonce)))
    }
}
