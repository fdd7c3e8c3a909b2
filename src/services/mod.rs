//! Services layer.
//!
//! Services sit between the command-line entry point and the providers:
//!
//! ```text
//! Entry point (CLI, config)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Providers (AI models, mailboxes)
//! ```
//!
//! # Services Overview
//!
//! - [`EmailAssistant`]: Categorizes a folder with an AI model and applies
//!   each decision through an email provider

mod assistant;

pub use assistant::{
    ActionOutcome, AssistantError, AssistantState, BatchEntry, BatchResult, EmailAssistant,
    RunMode, Summary, ARCHIVE_FOLDER, MISSING_FOLDER, UNSUPPORTED_ACTION,
};
