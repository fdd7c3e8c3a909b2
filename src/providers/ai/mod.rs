//! AI model implementations.
//!
//! Every backend implements [`AiModel`]. They differ only in transport; the
//! prompt layout, the decision format and the fall-back to `keep_inbox` live
//! in [`traits`].
//!
//! # Supported Models
//!
//! - **Ollama**: local inference through the native `/api/generate` endpoint
//! - **Anthropic**: Claude models via the Messages API
//! - **OpenAI**: chat completions, optionally against a compatible base URL
//!
//! # Example
//!
//! ```rust,no_run
//! use inbox_assistant::config::ResolvedConfig;
//! use inbox_assistant::providers::ai;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResolvedConfig::load(None)?;
//! let model = ai::from_config(&config)?;
//!
//! if !model.test_connection().await {
//!     eprintln!("{} is not reachable", model.name());
//! }
//! # Ok(())
//! # }
//! ```

mod anthropic;
mod ollama;
mod openai;
mod traits;

pub use anthropic::{AnthropicModel, ANTHROPIC_DEFAULT_MODEL};
pub use ollama::{OllamaModel, OLLAMA_DEFAULT_MODEL, OLLAMA_DEFAULT_URL};
pub use openai::{OpenAiModel, OPENAI_BASE_URL, OPENAI_DEFAULT_MODEL};
pub use traits::{
    parse_decision, render_prompt, soft_failure, AiModel, LlmError, LlmResult,
    CATEGORIZE_TIMEOUT, OUTPUT_DIRECTIVE,
};

#[cfg(test)]
pub use traits::MockAiModel;

use crate::config::{keys, ConfigError, ModelKind, ResolvedConfig};

/// Builds the model named by `ai.model`.
///
/// Fails when the name is unknown or a required credential is missing. No
/// network traffic happens here.
pub fn from_config(config: &ResolvedConfig) -> Result<Box<dyn AiModel>, ConfigError> {
    let kind = config.model_kind()?;

    let model: Box<dyn AiModel> = match kind {
        ModelKind::Ollama => Box::new(OllamaModel::new(
            config.get_or(keys::OLLAMA_URL, OLLAMA_DEFAULT_URL),
            config.get_or(keys::OLLAMA_MODEL, OLLAMA_DEFAULT_MODEL),
        )),
        ModelKind::Anthropic => Box::new(AnthropicModel::new(
            config.require(keys::ANTHROPIC_API_KEY)?,
            config.get_or(keys::ANTHROPIC_MODEL, ANTHROPIC_DEFAULT_MODEL),
        )),
        ModelKind::OpenAi => {
            let model = OpenAiModel::new(
                config.require(keys::OPENAI_API_KEY)?,
                config.get_or(keys::OPENAI_MODEL, OPENAI_DEFAULT_MODEL),
            );
            match config.get(keys::OPENAI_BASE_URL) {
                Some(url) => Box::new(model.with_base_url(url)),
                None => Box::new(model),
            }
        }
    };

    tracing::debug!(backend = model.name(), model = model.model(), "AI model selected");
    Ok(model)
}
