//! Client configuration and its store
//!
//! `OAuthConfig` holds endpoint paths and client credentials. Every field is
//! optional: consumers treat a missing field as "skip this call" rather than
//! validating up front. `ConfigStore` owns the config together with the
//! storage key name and the ignored-path patterns, and applies partial
//! updates with shallow-merge semantics.

use common::Secret;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::constants::{CODE_CHALLENGE_METHOD, DEFAULT_OPENID_SCOPE, DEFAULT_STORAGE_KEY};
use crate::types::OpenIdConfiguration;

/// Endpoint paths, client credentials and flow options.
///
/// Also used as the patch type for `ConfigStore::set_config`: `None` fields
/// in a patch leave the current value alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Issuer base URL used for discovery
    pub issuer_path: Option<String>,
    pub authorize_path: Option<String>,
    pub token_path: Option<String>,
    pub revoke_path: Option<String>,
    pub logout_path: Option<String>,
    pub user_path: Option<String>,
    pub introspection_path: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub scope: Option<String>,
    /// Send a PKCE S256 challenge on authorization requests
    pub pkce: Option<bool>,
    /// Redirect URI used when the login call does not name one
    pub redirect_uri: Option<String>,
    /// Post-logout redirect used when the logout call does not name one
    pub logout_redirect_uri: Option<String>,
}

impl OAuthConfig {
    /// Shallow merge: every field set in `patch` replaces the current value.
    pub fn merge(&mut self, patch: OAuthConfig) {
        fn take<T>(slot: &mut Option<T>, patch: Option<T>) {
            if patch.is_some() {
                *slot = patch;
            }
        }

        take(&mut self.issuer_path, patch.issuer_path);
        take(&mut self.authorize_path, patch.authorize_path);
        take(&mut self.token_path, patch.token_path);
        take(&mut self.revoke_path, patch.revoke_path);
        take(&mut self.logout_path, patch.logout_path);
        take(&mut self.user_path, patch.user_path);
        take(&mut self.introspection_path, patch.introspection_path);
        take(&mut self.client_id, patch.client_id);
        take(&mut self.client_secret, patch.client_secret);
        take(&mut self.scope, patch.scope);
        take(&mut self.pkce, patch.pkce);
        take(&mut self.redirect_uri, patch.redirect_uri);
        take(&mut self.logout_redirect_uri, patch.logout_redirect_uri);
    }

    /// Fill unset endpoints from a discovery document.
    ///
    /// Fields already configured are never overwritten. `pkce` is derived
    /// from `code_challenge_methods_supported` only when it was not set
    /// explicitly, and `scope` defaults to `openid`.
    pub fn apply_discovery(&mut self, doc: &OpenIdConfiguration) {
        fn fill(slot: &mut Option<String>, discovered: &Option<String>) {
            if slot.is_none() && discovered.is_some() {
                slot.clone_from(discovered);
            }
        }

        fill(&mut self.authorize_path, &doc.authorization_endpoint);
        fill(&mut self.token_path, &doc.token_endpoint);
        fill(&mut self.revoke_path, &doc.revocation_endpoint);
        fill(&mut self.user_path, &doc.userinfo_endpoint);
        fill(&mut self.introspection_path, &doc.introspection_endpoint);
        fill(&mut self.logout_path, &doc.end_session_endpoint);

        if self.pkce.is_none()
            && let Some(methods) = &doc.code_challenge_methods_supported
        {
            self.pkce = Some(methods.iter().any(|m| m == CODE_CHALLENGE_METHOD));
        }
        if self.scope.is_none() {
            self.scope = Some(DEFAULT_OPENID_SCOPE.to_string());
        }
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_ref().map(|s| s.expose().as_str())
    }
}

/// Everything a client is constructed with.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub config: OAuthConfig,
    /// Storage key for the persisted token (defaults to `token`)
    pub storage_key: Option<String>,
    /// Regular expressions matched against outgoing request URLs; matches are
    /// sent without an Authorization header.
    pub ignore_paths: Vec<String>,
}

struct ConfigState {
    config: OAuthConfig,
    storage_key: Option<String>,
    ignore_paths: Vec<Regex>,
}

/// Shared, mutable configuration.
pub struct ConfigStore {
    state: RwLock<ConfigState>,
}

impl ConfigStore {
    pub fn new(settings: OAuthSettings) -> Self {
        Self {
            state: RwLock::new(ConfigState {
                config: settings.config,
                storage_key: settings.storage_key,
                ignore_paths: compile_patterns(&settings.ignore_paths),
            }),
        }
    }

    /// Snapshot of the current config.
    pub async fn config(&self) -> OAuthConfig {
        self.state.read().await.config.clone()
    }

    /// Merge `patch` over the current config.
    pub async fn set_config(&self, patch: OAuthConfig) {
        self.state.write().await.config.merge(patch);
        debug!("config updated");
    }

    /// Merge a discovery document into the config (see `OAuthConfig::apply_discovery`).
    pub async fn apply_discovery(&self, doc: &OpenIdConfiguration) {
        self.state.write().await.config.apply_discovery(doc);
    }

    /// Storage key for the token, `token` when unset or empty.
    pub async fn storage_key(&self) -> String {
        let state = self.state.read().await;
        match state.storage_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => DEFAULT_STORAGE_KEY.to_string(),
        }
    }

    pub async fn set_storage_key(&self, key: Option<String>) {
        self.state.write().await.storage_key = key;
    }

    pub async fn ignored_paths(&self) -> Vec<Regex> {
        self.state.read().await.ignore_paths.clone()
    }

    pub async fn set_ignore_paths(&self, patterns: &[String]) {
        self.state.write().await.ignore_paths = compile_patterns(patterns);
    }

    /// Whether `url` matches any ignored-path pattern.
    pub async fn is_path_ignored(&self, url: &str) -> bool {
        self.state
            .read()
            .await
            .ignore_paths
            .iter()
            .any(|pattern| pattern.is_match(url))
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern, error = %e, "skipping invalid ignore path pattern");
                None
            }
        })
        .collect()
}
