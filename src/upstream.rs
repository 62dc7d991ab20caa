//! Streaming client for the third-party chat-completions endpoint.

use std::sync::Arc;

use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::providers::ChatCompletionRequest;

/// Issues one streamed completion request per call. There is no retry: a
/// failed attempt is terminal for the relay request that triggered it.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: Arc<RelayConfig>,
}

impl UpstreamClient {
    pub fn new(config: Arc<RelayConfig>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(config.upstream.connect_timeout())
            .build()
            .map_err(|e| RelayError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// POST the prompt as a single-turn conversation with `stream=true`.
    ///
    /// On 2xx the response is handed back unread; its body is the upstream
    /// SSE byte stream.
    pub async fn open_stream(&self, prompt: &str, model: &str) -> Result<Response, RelayError> {
        let upstream = &self.config.upstream;
        let (_, api_key) = upstream.credentials()?;
        let url = upstream.completions_url()?;
        let request = ChatCompletionRequest::single_turn(model, &upstream.system_prompt, prompt);

        debug!(%url, model, "opening upstream stream");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "upstream rejected request");
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
                status_text,
                body,
            });
        }

        Ok(response)
    }
}
