//! OpenID Connect command-line client
//!
//! Single-binary host for the `oidc-client` library that:
//! 1. Loads endpoint and client settings from a TOML file
//! 2. Persists the token under a state directory between invocations
//! 3. Runs one login, callback, logout or inspection command
//! 4. Prints URLs the user must open in a browser instead of navigating

mod cli;
mod commands;
mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oidc_client::{FileStorage, OAuthClient, ReqwestTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args = cli::Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        issuer = ?config.oauth.config.issuer_path,
        client_id = ?config.oauth.config.client_id,
        state_dir = %config.client.state_dir.display(),
        ignore_paths = config.client.ignore_paths.len(),
        "configuration loaded"
    );

    let storage = FileStorage::open(config.client.state_dir.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open state directory {}",
                config.client.state_dir.display()
            )
        })?;
    let http = ReqwestTransport::with_timeout(Duration::from_secs(config.client.timeout_secs))
        .context("failed to build HTTP client")?;

    let client = OAuthClient::new(config.settings(), Arc::new(storage), Arc::new(http))
        .await
        .context("failed to initialize OAuth client")?;

    let output = commands::run(&client, args.command).await?;
    println!("{output}");
    Ok(())
}
