//! Configuration resolution.
//!
//! This module builds a single read-only [`ResolvedConfig`] from a YAML file,
//! environment variables and a secret-mount directory, and selects the model
//! and provider variants it names.

mod settings;
mod variants;

pub use settings::{
    default_config_path, keys, ConfigError, ResolvedConfig, DEFAULT_PROMPT, DEFAULT_SECRETS_DIR,
};
pub use variants::{ModelKind, ProviderKind};
