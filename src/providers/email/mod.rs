//! Email provider implementations.
//!
//! This module contains the [`EmailProvider`] trait and implementations for
//! different mail backends:
//!
//! - [`Office365Provider`] - Microsoft Graph with OAuth 2.0
//! - [`ImapProvider`] - Standard IMAP (also used for `gmail` and `proton`)
//!
//! # Architecture
//!
//! Each provider handles its own authentication during construction, so a
//! provider value is always ready to use. After that the assistant only lists
//! one folder and applies per-message mutations.
//!
//! # Example
//!
//! ```ignore
//! use inbox_assistant::providers::email::{self, EmailProvider};
//!
//! async fn list_inbox(config: &ResolvedConfig) -> Result<()> {
//!     let provider = email::connect(config).await?;
//!
//!     for email in provider.get_emails("inbox", 50).await? {
//!         println!("{}: {}", email.from.display(), email.subject);
//!     }
//!     Ok(())
//! }
//! ```

mod imap;
mod office365;
mod traits;

pub use imap::{ImapConfig, ImapProvider};
pub use office365::{Office365Provider, GRAPH_API_BASE};
pub use traits::{EmailProvider, ProviderError, Result, MAILBOX_TIMEOUT};

#[cfg(test)]
pub use traits::MockEmailProvider;

use crate::config::{ProviderKind, ResolvedConfig};

/// Builds and authenticates the provider named by `email.provider`.
///
/// Unlike model construction this talks to the network: Office 365 acquires a
/// token and IMAP logs in.
pub async fn connect(config: &ResolvedConfig) -> Result<Box<dyn EmailProvider>> {
    let kind = config.provider_kind()?;
    tracing::debug!(provider = %kind, "Connecting email provider");

    match kind {
        ProviderKind::Office365 => Ok(Box::new(Office365Provider::connect(config).await?)),
        ProviderKind::Imap | ProviderKind::Gmail | ProviderKind::Proton => {
            let imap_config = ImapConfig::from_config(config, kind)?;
            Ok(Box::new(ImapProvider::connect(imap_config, kind).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{keys, ConfigError};

    #[tokio::test]
    async fn unknown_provider_is_config_error() {
        let config = ResolvedConfig::from_pairs([(keys::EMAIL_PROVIDER, "exchange")]);
        let result = connect(&config).await;
        assert!(matches!(
            result,
            Err(ProviderError::Config(ConfigError::UnknownVariant { .. }))
        ));
    }

    #[tokio::test]
    async fn imap_without_host_fails_before_connecting() {
        let config = ResolvedConfig::from_pairs([
            (keys::EMAIL_PROVIDER, "imap"),
            (keys::EMAIL_USERNAME, "me@example.com"),
            (keys::EMAIL_PASSWORD, "pw"),
        ]);
        let result = connect(&config).await;
        assert!(matches!(
            result,
            Err(ProviderError::Config(ConfigError::Missing(ref key))) if key == keys::IMAP_HOST
        ));
    }
}
