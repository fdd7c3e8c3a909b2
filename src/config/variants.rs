//! Backend variant selection.

use std::fmt;
use std::str::FromStr;

use super::settings::{keys, ConfigError, ResolvedConfig};

/// Which AI model backend to use (`ai.model`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Local Ollama server.
    Ollama,
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI chat completions (or a compatible endpoint).
    OpenAi,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Ollama => "ollama",
            ModelKind::Anthropic => "anthropic",
            ModelKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ModelKind::Ollama),
            "anthropic" => Ok(ModelKind::Anthropic),
            "openai" => Ok(ModelKind::OpenAi),
            _ => Err(ConfigError::UnknownVariant {
                kind: "AI model",
                name: s.to_string(),
            }),
        }
    }
}

/// Which mail backend to use (`email.provider`).
///
/// `Gmail` and `Proton` are IMAP with different connection defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Microsoft 365 via the Graph REST API.
    Office365,
    /// Any IMAP server.
    Imap,
    /// Gmail over IMAP.
    Gmail,
    /// Proton Mail through the local Bridge.
    Proton,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Office365 => "office365",
            ProviderKind::Imap => "imap",
            ProviderKind::Gmail => "gmail",
            ProviderKind::Proton => "proton",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "office365" => Ok(ProviderKind::Office365),
            "imap" => Ok(ProviderKind::Imap),
            "gmail" => Ok(ProviderKind::Gmail),
            "proton" => Ok(ProviderKind::Proton),
            _ => Err(ConfigError::UnknownVariant {
                kind: "email provider",
                name: s.to_string(),
            }),
        }
    }
}

impl ResolvedConfig {
    /// The configured model backend, defaulting to Ollama.
    pub fn model_kind(&self) -> Result<ModelKind, ConfigError> {
        self.get_or(keys::AI_MODEL, "ollama").parse()
    }

    /// The configured mail backend, defaulting to Office 365.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.get_or(keys::EMAIL_PROVIDER, "office365").parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let config = ResolvedConfig::new();
        assert_eq!(config.model_kind().unwrap(), ModelKind::Ollama);
        assert_eq!(config.provider_kind().unwrap(), ProviderKind::Office365);
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<ModelKind>().unwrap(), ModelKind::OpenAi);
        assert_eq!(" Gmail ".parse::<ProviderKind>().unwrap(), ProviderKind::Gmail);
    }

    #[test]
    fn unknown_variants_are_errors() {
        let config = ResolvedConfig::from_pairs([
            (keys::AI_MODEL, "gemini"),
            (keys::EMAIL_PROVIDER, "exchange"),
        ]);

        let err = config.model_kind().unwrap_err();
        assert_eq!(err.to_string(), "unknown AI model `gemini`");

        let err = config.provider_kind().unwrap_err();
        assert_eq!(err.to_string(), "unknown email provider `exchange`");
    }

    #[test]
    fn display_round_trips() {
        for kind in [ModelKind::Ollama, ModelKind::Anthropic, ModelKind::OpenAi] {
            assert_eq!(kind.to_string().parse::<ModelKind>().unwrap(), kind);
        }
        for kind in [
            ProviderKind::Office365,
            ProviderKind::Imap,
            ProviderKind::Gmail,
            ProviderKind::Proton,
        ] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }
}
