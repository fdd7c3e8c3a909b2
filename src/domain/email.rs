//! Email domain types.
//!
//! An [`Email`] is a read-only snapshot of a received message, just large
//! enough for a model to decide what to do with it.

use serde::{Deserialize, Serialize};

use super::EmailId;

/// Maximum number of characters kept in [`Email::preview`].
pub const PREVIEW_LEN: usize = 200;

/// A received message snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Provider-assigned identifier.
    pub id: EmailId,
    /// Subject line.
    pub subject: String,
    /// Sender display name and address.
    pub from: Sender,
    /// Plain-text preview, at most [`PREVIEW_LEN`] characters.
    pub preview: String,
    /// Received timestamp in the provider's own string form.
    pub received: String,
    /// Whether the message has been read.
    pub is_read: bool,
    /// Folder the message was fetched from.
    pub folder: Option<String>,
}

impl Email {
    /// Serializes the fields a model sees, one per line.
    pub fn to_summary(&self) -> String {
        format!(
            "Subject: {}\nFrom: {}\nDate: {}\nPreview: {}",
            self.subject,
            self.from.display(),
            self.received,
            self.preview
        )
    }
}

/// An email sender with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Display name (e.g., "Jane Doe").
    pub name: Option<String>,
    /// Email address.
    pub address: String,
}

impl Sender {
    /// Creates a sender with just an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Creates a sender with address and display name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: if name.trim().is_empty() {
                None
            } else {
                Some(name)
            },
            address: address.into(),
        }
    }

    /// Returns "Name <address>", or the bare address when there is no name.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.address),
            None => self.address.clone(),
        }
    }
}

/// Collapses whitespace and truncates text to [`PREVIEW_LEN`] characters.
pub fn make_preview(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(PREVIEW_LEN)
        .collect()
}
