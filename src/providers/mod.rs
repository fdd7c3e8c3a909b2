//! AI model and email provider implementations.
//!
//! This module contains the capability traits and their variants for the two
//! external services the assistant depends on:
//!
//! - [`ai`] - AI models (Ollama, Anthropic, OpenAI)
//! - [`email`] - Email providers (Office 365 Graph, IMAP)

use std::time::Duration;

pub mod ai;
pub mod email;

/// Timeout for connectivity probes against either service.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
