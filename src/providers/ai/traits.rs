//! AI model trait and the categorization contract shared by every backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{Action, CategoryDecision, Email};

/// Timeout for a single categorization call.
pub const CATEGORIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Token budget for a categorization answer.
pub const CATEGORIZE_MAX_TOKENS: usize = 1024;

/// Token budget for connectivity probes.
pub const PROBE_MAX_TOKENS: usize = 10;

/// Output format appended to every categorization prompt.
pub const OUTPUT_DIRECTIVE: &str = r#"Respond in JSON format:
{
    "action": "keep_inbox|archive|delete|mark_read|move_folder",
    "reason": "brief explanation",
    "folder": "folder name if action is move_folder, otherwise null"
}"#;

/// Errors that can occur while talking to a model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Provider not available: {0}")]
    Unavailable(String),
}

/// Result type for model operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// An AI model that can categorize emails.
///
/// Backends only differ in transport: they implement [`complete`](Self::complete)
/// and [`test_connection`](Self::test_connection). Prompt rendering, decision
/// parsing and the fallback to [`Action::KeepInbox`] are shared by the provided
/// [`categorize`](Self::categorize).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiModel: Send + Sync {
    /// Returns the backend name (e.g., "ollama", "anthropic", "openai").
    fn name(&self) -> &str;

    /// Returns the model identifier being used.
    fn model(&self) -> &str;

    /// Sends one combined instruction and returns the raw answer text.
    async fn complete(&self, prompt: &str) -> LlmResult<String>;

    /// Issues a minimal side-effect-free request. Never fails; returns `false`
    /// when the backend is unreachable or rejects the call.
    async fn test_connection(&self) -> bool;

    /// Decides what to do with `email` under the policy in `prompt`.
    ///
    /// Never fails: any transport, status, or parse error yields a
    /// `keep_inbox` decision whose reason describes the error.
    async fn categorize(&self, email: &Email, prompt: &str) -> CategoryDecision {
        let full_prompt = render_prompt(prompt, email);

        match self.complete(&full_prompt).await {
            Ok(text) => match parse_decision(&text) {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(model = self.name(), error = %e, raw = %text, "Unparseable categorization");
                    soft_failure(&e)
                }
            },
            Err(e) => {
                tracing::error!(model = self.name(), error = %e, "Categorization failed");
                soft_failure(&e)
            }
        }
    }
}

/// Combines the policy prompt, the email summary and the output directive.
pub fn render_prompt(policy: &str, email: &Email) -> String {
    format!(
        "{}\n\nEmail to categorize:\n{}\n\n{}\n",
        policy.trim_end(),
        email.to_summary(),
        OUTPUT_DIRECTIVE
    )
}

/// Reads a `Retry-After` header given in seconds.
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// The decision returned in place of an error.
pub fn soft_failure(error: &LlmError) -> CategoryDecision {
    CategoryDecision::keep_inbox(format!("Error during categorization: {}", error))
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    reason: String,
    #[serde(default)]
    folder: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parses a model answer into a decision.
///
/// Surrounding prose or Markdown fences are ignored; the outermost `{...}` is
/// decoded. The action must be one of the closed [`Action`] set.
pub fn parse_decision(text: &str) -> LlmResult<CategoryDecision> {
    let json = extract_json_object(text)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in model output".to_string()))?;

    let raw: RawDecision = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidResponse(format!("malformed decision: {}", e)))?;

    let action: Action = raw
        .action
        .parse()
        .map_err(|e: crate::domain::UnknownAction| LlmError::InvalidResponse(e.to_string()))?;

    let mut decision = CategoryDecision::new(action, raw.reason);
    if let Some(folder) = raw.folder {
        decision = decision.with_folder(folder);
    }
    if let Some(confidence) = raw.confidence {
        decision = decision.with_confidence(confidence);
    }
    Ok(decision)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
