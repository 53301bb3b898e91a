//! Client for the remote PoW generation service.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::PowError;

#[derive(Debug, Deserialize)]
struct GenerateWorkResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<WorkData>,
}

#[derive(Debug, Deserialize)]
struct WorkData {
    work: String,
}

/// Delegates nonce generation to `<endpoint>/<api key>/api/generate_work`.
#[derive(Clone)]
pub struct PowClient {
    client: Client,
    endpoint: Url,
}

impl PowClient {
    /// # Errors
    /// Returns [`PowError::Transport`] if `endpoint` is not a URL or the client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, PowError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| PowError::Transport(format!("invalid endpoint: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .user_agent(concat!("vite-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PowError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    fn work_url(&self, api_key: &str) -> Result<Url, PowError> {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| PowError::Transport("endpoint cannot carry a path".to_string()))?
            .clear()
            .push(api_key)
            .push("api")
            .push("generate_work");
        Ok(url)
    }

    /// Requests a nonce for `hash` meeting `threshold`.
    ///
    /// The service returns the work as big-endian hex; the nonce is its byte-reversed form.
    ///
    /// # Errors
    /// - [`PowError::Rejected`] when the service answers with a non-zero `code`
    /// - [`PowError::Transport`] on network failures
    /// - [`PowError::InvalidResponse`] when the body or the work is malformed
    pub async fn generate_work(
        &self,
        api_key: &str,
        hash: &str,
        threshold: &str,
    ) -> Result<Vec<u8>, PowError> {
        let url = self.work_url(api_key)?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "hash": hash, "threshold": threshold }))
            .send()
            .await
            .map_err(|e| PowError::Transport(e.to_string()))?;

        let body: GenerateWorkResponse =
            response.json().await.map_err(|e| PowError::InvalidResponse(e.to_string()))?;

        if body.code != 0 {
            let message = body.error.or(body.msg).unwrap_or_else(|| "Unknown error".to_string());
            tracing::debug!(code = body.code, message = %message, "pow service rejected request");
            return Err(PowError::Rejected(message));
        }

        let work = body.data.map(|data| data.work).ok_or_else(|| {
            PowError::InvalidResponse("missing data.work".to_string())
        })?;
        let mut nonce =
            hex::decode(&work).map_err(|e| PowError::InvalidResponse(format!("work: {e}")))?;
        nonce.reverse();
        Ok(nonce)
    }
}
