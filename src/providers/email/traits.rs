//! Email provider trait definition.
//!
//! This module defines the [`EmailProvider`] trait which abstracts over the
//! mail backends (Microsoft Graph, IMAP). The assistant only needs to list a
//! folder and apply a handful of mutations to individual messages.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConfigError, ProviderKind};
use crate::domain::{Email, EmailId};

/// Timeout for a single mailbox call.
pub const MAILBOX_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type alias for email provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during email provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested message or folder was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Provider-specific error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Missing or invalid provider settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Trait for mail backends.
///
/// Mutations are addressed by the opaque [`EmailId`] the same provider
/// returned from [`get_emails`](Self::get_emails). `Ok(())` means the server
/// accepted the change; any error means it was not applied.
///
/// # Example
///
/// ```ignore
/// use inbox_assistant::providers::email::EmailProvider;
///
/// async fn archive_all(provider: &dyn EmailProvider) -> Result<()> {
///     for email in provider.get_emails("inbox", 10).await? {
///         provider.move_email(&email.id, "archive").await?;
///     }
///     Ok(())
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Returns the type of this provider.
    fn provider_type(&self) -> ProviderKind;

    /// Lists up to `limit` messages from `folder`, newest first.
    ///
    /// An empty folder is `Ok(vec![])`; errors mean the listing itself failed.
    async fn get_emails(&self, folder: &str, limit: usize) -> Result<Vec<Email>>;

    /// Moves a message into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the message or the destination
    /// folder does not exist.
    async fn move_email(&self, id: &EmailId, destination: &str) -> Result<()>;

    /// Marks a message as read. Marking an already-read message succeeds.
    async fn mark_read(&self, id: &EmailId) -> Result<()>;

    /// Deletes a message. The provider decides whether this is a move to the
    /// trash or a permanent removal.
    async fn delete_email(&self, id: &EmailId) -> Result<()>;

    /// Issues a minimal read-only request. Never fails; returns `false` when
    /// the mailbox is unreachable or rejects the credentials.
    async fn test_connection(&self) -> bool;
}
