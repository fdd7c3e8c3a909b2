//! Layered key-value configuration.
//!
//! Values are resolved once at startup from three layers, each overriding the
//! previous one for the same key:
//!
//! 1. A YAML file, flattened to dotted keys (`ai: {model: x}` becomes `ai.model`)
//! 2. Environment variables from a fixed mapping table
//! 3. Files in a secret-mount directory (`/run/secrets` by default)
//!
//! The result is read-only for the rest of the run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_yaml::Value;
use thiserror::Error;

/// Default secret-mount directory.
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Well-known configuration keys.
pub mod keys {
    pub const AI_MODEL: &str = "ai.model";
    pub const OLLAMA_URL: &str = "ai.ollama.url";
    pub const OLLAMA_MODEL: &str = "ai.ollama.model";
    pub const ANTHROPIC_API_KEY: &str = "ai.anthropic.api_key";
    pub const ANTHROPIC_MODEL: &str = "ai.anthropic.model";
    pub const OPENAI_API_KEY: &str = "ai.openai.api_key";
    pub const OPENAI_MODEL: &str = "ai.openai.model";
    pub const OPENAI_BASE_URL: &str = "ai.openai.base_url";

    pub const EMAIL_PROVIDER: &str = "email.provider";
    pub const EMAIL_USERNAME: &str = "email.username";
    pub const EMAIL_PASSWORD: &str = "email.password";
    pub const IMAP_HOST: &str = "email.imap.host";
    pub const IMAP_PORT: &str = "email.imap.port";
    pub const IMAP_SSL: &str = "email.imap.ssl";
    pub const O365_CLIENT_ID: &str = "email.office365.client_id";
    pub const O365_CLIENT_SECRET: &str = "email.office365.client_secret";
    pub const O365_TENANT_ID: &str = "email.office365.tenant_id";

    pub const CATEGORIZATION_PROMPT: &str = "categorization.prompt";
}

/// Environment variable to config key mapping.
const ENV_MAPPING: &[(&str, &str)] = &[
    ("EMAIL_PROVIDER", keys::EMAIL_PROVIDER),
    ("EMAIL_HOST", keys::IMAP_HOST),
    ("EMAIL_PORT", keys::IMAP_PORT),
    ("EMAIL_USERNAME", keys::EMAIL_USERNAME),
    ("EMAIL_PASSWORD", keys::EMAIL_PASSWORD),
    ("O365_CLIENT_ID", keys::O365_CLIENT_ID),
    ("O365_CLIENT_SECRET", keys::O365_CLIENT_SECRET),
    ("O365_TENANT_ID", keys::O365_TENANT_ID),
    ("AI_MODEL", keys::AI_MODEL),
    ("OLLAMA_URL", keys::OLLAMA_URL),
    ("OLLAMA_MODEL", keys::OLLAMA_MODEL),
    ("ANTHROPIC_API_KEY", keys::ANTHROPIC_API_KEY),
    ("ANTHROPIC_MODEL", keys::ANTHROPIC_MODEL),
    ("OPENAI_API_KEY", keys::OPENAI_API_KEY),
    ("OPENAI_MODEL", keys::OPENAI_MODEL),
    ("OPENAI_BASE_URL", keys::OPENAI_BASE_URL),
    ("CATEGORIZATION_PROMPT", keys::CATEGORIZATION_PROMPT),
];

/// Secret file name to config key mapping.
const SECRET_MAPPING: &[(&str, &str)] = &[
    ("email_password", keys::EMAIL_PASSWORD),
    ("o365_client_secret", keys::O365_CLIENT_SECRET),
    ("anthropic_api_key", keys::ANTHROPIC_API_KEY),
    ("openai_api_key", keys::OPENAI_API_KEY),
];

/// Policy prompt used when `categorization.prompt` is not configured.
pub const DEFAULT_PROMPT: &str = "You are an email categorization assistant. \
Analyze the following email and decide what action to take.

Categories:
- keep_inbox: Important emails that need attention
- archive: Newsletters, receipts, confirmations that are done with
- mark_read: Low priority items to mark as read but keep
- move_folder: Emails that belong in specific folders
- delete: Spam or completely irrelevant emails

Keep anything that seems important, work-related, or requires action.
Archive newsletters, marketing emails, and transactional emails (receipts, confirmations).
Only delete obvious spam.";

/// Errors raised while resolving or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("missing required configuration key `{0}`")]
    Missing(String),

    #[error("invalid value {value:?} for `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown {kind} `{name}`")]
    UnknownVariant { kind: &'static str, name: String },
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    values: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from explicit key-value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (key, value) in pairs {
            config.set(key, value);
        }
        config
    }

    /// Resolves configuration from the file, the process environment and the
    /// default secret-mount directory.
    ///
    /// An explicit `path` must exist. Without one, the per-user config file is
    /// used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        match path {
            Some(path) => config.layer_file(path)?,
            None => {
                if let Some(default) = default_config_path().filter(|p| p.exists()) {
                    config.layer_file(&default)?;
                }
            }
        }

        config.layer_env_with(|name| std::env::var(name).ok());
        config.layer_secrets_dir(Path::new(DEFAULT_SECRETS_DIR))?;
        Ok(config)
    }

    /// Layers values from a YAML file.
    pub fn layer_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.layer_yaml(&text, path)?;
        self.source = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(())
    }

    /// Layers values from YAML text. `origin` is only used in error messages.
    pub fn layer_yaml(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let root: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        let mut flat = BTreeMap::new();
        flatten_yaml("", &root, &mut flat);
        self.values.extend(flat);
        Ok(())
    }

    /// Layers values from environment variables using `lookup` to read them.
    pub fn layer_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (env_key, config_key) in ENV_MAPPING {
            if let Some(value) = lookup(env_key).filter(|v| !v.is_empty()) {
                tracing::debug!(env = env_key, key = config_key, "Config override from environment");
                self.set(*config_key, value);
            }
        }
    }

    /// Layers values from secret files in `dir`. A missing directory is ignored.
    pub fn layer_secrets_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
        if !dir.is_dir() {
            return Ok(());
        }

        for (file_name, config_key) in SECRET_MAPPING {
            let path = dir.join(file_name);
            if !path.is_file() {
                continue;
            }
            let value = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?
                .trim()
                .to_string();
            self.set(*config_key, value);
            tracing::info!(secret = file_name, "Loaded secret");
        }
        Ok(())
    }

    /// Sets a single value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Path of the config file that was loaded, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `default` when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns the value for `key`, failing when absent or blank.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Parses the value for `key` if present.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Reads a boolean value (`true/false`, `yes/no`, `on/off`, `1/0`).
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "expected a boolean".to_string(),
                }),
            })
            .transpose()
    }

    /// The policy prompt handed to the model.
    pub fn categorization_prompt(&self) -> &str {
        self.get(keys::CATEGORIZATION_PROMPT)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PROMPT)
    }

    /// Number of resolved keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys were resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-user config file location (`<config dir>/inbox-assistant/config.yaml`).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "inbox-assistant")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
}

fn flatten_yaml(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = match key {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                flatten_yaml(&join(&key), child, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out),
        Value::Null | Value::Sequence(_) => {}
    }
}
