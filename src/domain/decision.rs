//! Categorization decision types.
//!
//! [`Action`] is the closed vocabulary shared by every model and every
//! provider. Anything a model says outside it is a parse failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Leave the email where it is.
    KeepInbox,
    /// Move the email to the archive folder.
    Archive,
    /// Delete the email.
    Delete,
    /// Mark the email as read.
    MarkRead,
    /// Mark the email as unread.
    MarkUnread,
    /// Flag the email for follow-up.
    Flag,
    /// Move the email to the folder named in the decision.
    MoveFolder,
}

impl Action {
    /// Every action, in declaration order.
    pub const ALL: [Action; 7] = [
        Action::KeepInbox,
        Action::Archive,
        Action::Delete,
        Action::MarkRead,
        Action::MarkUnread,
        Action::Flag,
        Action::MoveFolder,
    ];

    /// Returns the wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::KeepInbox => "keep_inbox",
            Action::Archive => "archive",
            Action::Delete => "delete",
            Action::MarkRead => "mark_read",
            Action::MarkUnread => "mark_unread",
            Action::Flag => "flag",
            Action::MoveFolder => "move_folder",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s.trim())
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// A model's verdict for one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDecision {
    /// The action to take.
    pub action: Action,
    /// Human-readable explanation.
    pub reason: String,
    /// Destination folder; only meaningful for [`Action::MoveFolder`].
    pub folder: Option<String>,
    /// Model confidence in the range 0.0 to 1.0, when reported.
    pub confidence: Option<f32>,
}

impl CategoryDecision {
    /// Creates a decision without folder or confidence.
    pub fn new(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            folder: None,
            confidence: None,
        }
    }

    /// The safe default: leave the email alone.
    pub fn keep_inbox(reason: impl Into<String>) -> Self {
        Self::new(Action::KeepInbox, reason)
    }

    /// Sets the destination folder. Blank names are treated as absent.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        self.folder = if folder.trim().is_empty() {
            None
        } else {
            Some(folder.trim().to_string())
        };
        self
    }

    /// Sets the confidence score.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}
