//! inbox-assistant - AI-assisted inbox triage
//!
//! This crate fetches a bounded batch of emails from a mail provider, asks an
//! AI model what to do with each one, and applies (or, by default, only
//! reports) those decisions.

pub mod cli;
pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use services::{EmailAssistant, RunMode};
