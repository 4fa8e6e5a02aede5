//! REST client for the generation service.
//!
//! Wraps `POST {api_url}/generate` using [`reqwest`].

use async_trait::async_trait;

use crate::service::{GenerationError, GenerationRequest, GenerationResult, GenerationService};

/// HTTP client for a single generation service endpoint.
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
}

impl GenerationApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8080`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`GenerationError::Api`] with the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationService for GenerationApi {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let response = self
            .client
            .post(format!("{}/generate", self.api_url))
            .json(request)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        let result: GenerationResult = serde_json::from_slice(&bytes)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        result.validate()?;

        tracing::debug!(
            campaign_id = %request.campaign_id,
            revision = request.revision,
            variants = result.variants.len(),
            cost = result.cost,
            "Generation service responded"
        );
        Ok(result)
    }
}
