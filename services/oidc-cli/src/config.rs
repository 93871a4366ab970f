//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from OIDC_CLIENT_SECRET, client_secret_file,
//! or an inline client_secret, in that order.

use common::Secret;
use oidc_client::{OAuthConfig, OAuthSettings};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthSection,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Identity provider endpoints and client credentials
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    #[serde(flatten)]
    pub config: OAuthConfig,
    /// Path to a file containing the client secret (alternative to
    /// OIDC_CLIENT_SECRET env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

/// Local client behaviour
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Directory holding the persisted token
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub storage_key: Option<String>,
    /// URL patterns sent without an Authorization header
    #[serde(default)]
    pub ignore_paths: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            storage_key: None,
            ignore_paths: Vec::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".oidc-cli")
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OIDC_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    /// 3. client_secret inline in the config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var("OIDC_CLIENT_SECRET") {
            config.oauth.config.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.config.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let oauth = &self.oauth.config;
        let endpoints = [
            ("issuer_path", &oauth.issuer_path),
            ("authorize_path", &oauth.authorize_path),
            ("token_path", &oauth.token_path),
            ("revoke_path", &oauth.revoke_path),
            ("logout_path", &oauth.logout_path),
            ("user_path", &oauth.user_path),
            ("introspection_path", &oauth.introspection_path),
        ];
        for (name, value) in endpoints {
            if let Some(url) = value
                && !url.starts_with("http://")
                && !url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if oauth.issuer_path.is_none() && oauth.token_path.is_none() {
            return Err(common::Error::Config(
                "either issuer_path or token_path must be set".into(),
            ));
        }

        if self.client.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        for pattern in &self.client.ignore_paths {
            Regex::new(pattern).map_err(|e| {
                common::Error::Config(format!("invalid ignore_paths pattern {pattern:?}: {e}"))
            })?;
        }

        Ok(())
    }

    /// Settings handed to the OAuth client.
    pub fn settings(&self) -> OAuthSettings {
        OAuthSettings {
            config: self.oauth.config.clone(),
            storage_key: self.client.storage_key.clone(),
            ignore_paths: self.client.ignore_paths.clone(),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oidc-cli.toml")
    }
}
