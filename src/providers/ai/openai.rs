//! OpenAI chat-completions model implementation.
//!
//! Works with OpenAI and any endpoint that speaks the same API (vLLM,
//! LM Studio, Azure-style gateways) through a base URL override.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::traits::{
    retry_after_secs, AiModel, LlmError, LlmResult, CATEGORIZE_MAX_TOKENS, CATEGORIZE_TIMEOUT,
    PROBE_MAX_TOKENS,
};
use crate::providers::PROBE_TIMEOUT;

/// Default base URL for OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI model.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4";

/// Model families that accept `response_format: json_object`.
const JSON_MODE_PREFIXES: &[&str] = &[
    "gpt-4o",
    "gpt-4-turbo",
    "gpt-4-1106",
    "gpt-4-0125",
    "gpt-4.1",
    "gpt-3.5-turbo",
];

fn supports_json_mode(model: &str) -> bool {
    JSON_MODE_PREFIXES.iter().any(|p| model.starts_with(p))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Model behind an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Points the model at a compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// JSON mode is only requested when asked for and the model accepts it.
    fn request<'a>(&'a self, content: &'a str, max_tokens: usize, json_mode: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content,
            }],
            max_tokens,
            response_format: (json_mode && supports_json_mode(&self.model))
                .then_some(ResponseFormat::JsonObject),
        }
    }

    async fn post(&self, request: &ChatRequest<'_>, timeout: Duration) -> LlmResult<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, retry_after, &body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        first_choice_text(body)
    }
}

fn classify_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope)
            if status == StatusCode::UNAUTHORIZED
                || envelope.error.code.as_deref() == Some("invalid_api_key") =>
        {
            LlmError::AuthenticationError(envelope.error.message)
        }
        Ok(envelope) if status == StatusCode::NOT_FOUND => {
            LlmError::Unavailable(envelope.error.message)
        }
        Ok(envelope) => LlmError::ApiError {
            status: status.as_u16(),
            message: envelope.error.message,
        },
        Err(_) => LlmError::ApiError {
            status: status.as_u16(),
            message: format!("HTTP {}", status.as_u16()),
        },
    }
}

fn first_choice_text(response: ChatResponse) -> LlmResult<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("Empty message content".to_string()))
}

#[async_trait]
impl AiModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let request = self.request(prompt, CATEGORIZE_MAX_TOKENS, true);
        self.post(&request, CATEGORIZE_TIMEOUT).await
    }

    async fn test_connection(&self) -> bool {
        let request = self.request("test", PROBE_MAX_TOKENS, false);
        match self.post(&request, PROBE_TIMEOUT).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, model = %self.model, "OpenAI probe failed");
                false
            }
        }
    }
}
