//! Ollama model implementation.
//!
//! Talks to Ollama's native API: `POST /api/generate` in JSON mode for
//! categorization and `GET /api/tags` as the connectivity probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{AiModel, LlmError, LlmResult, CATEGORIZE_TIMEOUT};
use crate::providers::PROBE_TIMEOUT;

/// Default Ollama server URL.
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Default Ollama model.
pub const OLLAMA_DEFAULT_MODEL: &str = "qwen2.5:7b";

/// `/api/generate` request body.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str,
}

/// `/api/generate` response body.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama error body.
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// Model served by a local (or remote) Ollama server.
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaModel {
    /// Creates a model against `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Creates a model on the default localhost server.
    pub fn local(model: impl Into<String>) -> Self {
        Self::new(OLLAMA_DEFAULT_URL, model)
    }

    /// Overrides the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        }
    }

    async fn handle_error_response(&self, response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();

        if let Ok(error) = response.json::<OllamaError>().await {
            if status == 404 {
                return LlmError::Unavailable(error.error);
            }
            return LlmError::ApiError {
                status,
                message: error.error,
            };
        }

        LlmError::ApiError {
            status,
            message: format!("HTTP {}", status),
        }
    }
}

impl Default for OllamaModel {
    fn default() -> Self {
        Self::local(OLLAMA_DEFAULT_MODEL)
    }
}

#[async_trait]
impl AiModel for OllamaModel {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(CATEGORIZE_TIMEOUT)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error_response(response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        Ok(body.response)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::error!(status = %response.status(), url = %url, "Ollama probe rejected");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, url = %url, "Ollama unreachable");
                false
            }
        }
    }
}
