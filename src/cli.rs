//! Command-line interface for inbox-assistant.
//!
//! One invocation processes one bounded batch and exits. Without
//! `--execute` nothing in the mailbox is changed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::ResolvedConfig;
use crate::services::{EmailAssistant, RunMode};

/// inbox-assistant - Categorize emails with an AI model and act on them
#[derive(Parser, Debug)]
#[command(name = "inbox-assistant")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the per-user config.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Apply decisions instead of only reporting them
    #[arg(long)]
    pub execute: bool,

    /// Folder to process
    #[arg(long, default_value = "inbox")]
    pub folder: String,

    /// Maximum number of emails to process
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,

    /// Only test the model and mailbox connections
    #[arg(long)]
    pub test: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        if self.execute {
            RunMode::Execute
        } else {
            RunMode::DryRun
        }
    }

    /// Log filter for this invocation.
    ///
    /// `rust_log` (the `RUST_LOG` value) replaces the INFO default when set;
    /// `--verbose` then raises everything to at least DEBUG.
    pub fn log_filter(&self, rust_log: Option<&str>) -> EnvFilter {
        let filter = match rust_log.map(str::trim) {
            Some(directives) if !directives.is_empty() => EnvFilter::new(directives),
            _ => EnvFilter::new("info"),
        };
        if self.verbose {
            filter.add_directive(Level::DEBUG.into())
        } else {
            filter
        }
    }

    /// Runs the command and returns the process exit code.
    ///
    /// Configuration, construction and connection failures are errors.
    /// A batch whose folder listing failed is `ExitCode::FAILURE`.
    pub async fn execute(&self) -> Result<ExitCode> {
        let config = ResolvedConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        let mut assistant = EmailAssistant::initialize(&config, self.mode())
            .await
            .context("Failed to initialize email assistant")?;

        assistant
            .test_connections()
            .await
            .context("Connection test failed")?;

        if self.test {
            println!("Connection test passed");
            return Ok(ExitCode::SUCCESS);
        }

        let batch = assistant.process(&self.folder, self.limit).await?;
        let summary = assistant.summarize(&batch)?;
        println!("{}", summary);

        Ok(if summary.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}
