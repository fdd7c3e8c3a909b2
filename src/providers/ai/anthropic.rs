//! Anthropic Claude API model implementation.
//!
//! One user turn per call against the Messages API. Only `text` content
//! blocks are read back; anything else (tool use, thinking) is skipped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::traits::{
    retry_after_secs, AiModel, LlmError, LlmResult, CATEGORIZE_MAX_TOKENS, CATEGORIZE_TIMEOUT,
    PROBE_MAX_TOKENS,
};
use crate::providers::PROBE_TIMEOUT;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default Claude model.
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: [Turn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Claude via Anthropic's Messages API.
pub struct AnthropicModel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Claude 3.5 Sonnet, the default when `ai.anthropic.model` is unset.
    pub fn claude_sonnet(api_key: impl Into<String>) -> Self {
        Self::new(api_key, ANTHROPIC_DEFAULT_MODEL)
    }

    /// Overrides the Messages endpoint (proxies, test servers).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn request<'a>(&'a self, content: &'a str, max_tokens: usize) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: [Turn {
                role: "user",
                content,
            }],
        }
    }

    async fn post(&self, content: &str, max_tokens: usize, timeout: Duration) -> LlmResult<String> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .json(&self.request(content, max_tokens))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, retry_after, &body));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        response_text(body)
    }
}

/// Maps a non-success Messages API response to an error.
fn classify_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope)
            if status == StatusCode::UNAUTHORIZED || envelope.error.kind == "authentication_error" =>
        {
            LlmError::AuthenticationError(envelope.error.message)
        }
        Ok(envelope) => LlmError::ApiError {
            status: status.as_u16(),
            message: format!("{}: {}", envelope.error.kind, envelope.error.message),
        },
        Err(_) => LlmError::ApiError {
            status: status.as_u16(),
            message: format!("HTTP {}", status.as_u16()),
        },
    }
}

fn response_text(response: MessagesResponse) -> LlmResult<String> {
    let text: String = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();

    if text.is_empty() {
        return Err(LlmError::InvalidResponse(format!(
            "No text content in response (stop_reason: {})",
            response.stop_reason.as_deref().unwrap_or("none")
        )));
    }
    Ok(text)
}

#[async_trait]
impl AiModel for AnthropicModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        self.post(prompt, CATEGORIZE_MAX_TOKENS, CATEGORIZE_TIMEOUT)
            .await
    }

    async fn test_connection(&self) -> bool {
        match self.post("test", PROBE_MAX_TOKENS, PROBE_TIMEOUT).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, model = %self.model, "Anthropic probe failed");
                false
            }
        }
    }
}
