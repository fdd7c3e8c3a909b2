//! inbox-assistant - Entry point for the email triage CLI

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use inbox_assistant::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter(rust_log.as_deref()))
        .with_target(false)
        .init();

    tracing::debug!(?cli, "Starting inbox-assistant");

    match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
