//! The current token and its lifecycle
//!
//! A client holds exactly one token. It is persisted under the configured
//! storage key and replaced wholesale on every login, refresh, callback or
//! logout. Derived values (header, status, error) are computed from the
//! current token on read.
//!
//! Expiry handling:
//! 1. A token arriving with `expires_in` and no `expires` is stamped once
//!    with `expires = now + expires_in * 1000`. `TokenStore::write` does this
//!    for every write; `stamp_expiry` covers a token hydrated unstamped.
//! 2. A stamped token observed past `expires` is refreshed through the token
//!    endpoint and replaced with the result, preserving its grant type.
//!
//! The watcher task (`spawn_token_watcher`) runs step 2 on every write.
//! The request interceptor runs step 2 inline before attaching credentials.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, OAuthConfig};
use crate::error::Result;
use crate::grants;
use crate::http::HttpTransport;
use crate::metrics::record_refresh;
use crate::storage::{Storage, StoredValue};

/// How the current token was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    ResourceOwnerPassword,
    ClientCredentials,
}

/// Authorization status derived from the current token.
///
/// `error` takes precedence over everything; `Authorized` requires an
/// unexpired access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    NotAuthorized,
    Authorized,
    Denied,
}

impl AuthStatus {
    /// Status label for logging and the CLI.
    pub fn label(&self) -> &'static str {
        match self {
            AuthStatus::NotAuthorized => "NOT_AUTHORIZED",
            AuthStatus::Authorized => "AUTHORIZED",
            AuthStatus::Denied => "DENIED",
        }
    }
}

/// Token endpoint response merged with the flow state stashed around a
/// redirect (`nonce`, `code_verifier`, `redirect_uri`).
///
/// `expires` is a unix timestamp in milliseconds, computed once from
/// `expires_in` (seconds delta) when the token is first observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Authorization code from a callback, consumed by the code exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<GrantType>,
    /// Fields the server sent that the client does not interpret
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Accepts seconds/milliseconds as a JSON number or a numeric string, since
/// callback fragments carry every value as text.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Token {
    /// A token carrying only an error, as written on protocol failures.
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Parse a response body, `None` when it is not a token object.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "response body is not a token");
                None
            }
        }
    }

    /// True iff `expires` is set and already passed. Tokens without
    /// `expires` never count as expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires.is_some_and(|expires| now > expires)
    }

    /// `"{token_type} {access_token}"` when both are present.
    pub fn authorization_header(&self) -> Option<String> {
        match (self.token_type.as_deref(), self.access_token.as_deref()) {
            (Some(kind), Some(token)) if !kind.is_empty() && !token.is_empty() => {
                Some(format!("{kind} {token}"))
            }
            _ => None,
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status_at(now_millis())
    }

    pub fn status_at(&self, now: u64) -> AuthStatus {
        if self.error.as_deref().is_some_and(|e| !e.is_empty()) {
            AuthStatus::Denied
        } else if self.access_token.as_deref().is_some_and(|t| !t.is_empty())
            && !self.is_expired_at(now)
        {
            AuthStatus::Authorized
        } else {
            AuthStatus::NotAuthorized
        }
    }

    /// Copy with `expires` computed from `expires_in`, if it still needs one.
    pub fn stamped(&self, now: u64) -> Option<Token> {
        match (self.expires_in, self.expires) {
            (Some(expires_in), None) => Some(Token {
                expires: Some(now.saturating_add(expires_in.saturating_mul(1000))),
                ..self.clone()
            }),
            _ => None,
        }
    }
}

/// The single current token, persisted and observable.
pub struct TokenStore {
    value: StoredValue<Token>,
    refresh_lock: Mutex<()>,
}

impl TokenStore {
    /// Hydrate the token persisted under `key` (empty when absent).
    pub async fn load(storage: Arc<dyn Storage>, key: String) -> Result<Self> {
        let value = StoredValue::load(storage, key, Token::default()).await?;
        Ok(Self {
            value,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Current token. No side effects.
    pub fn read(&self) -> Token {
        self.value.get()
    }

    /// Replace the token wholesale and persist it.
    ///
    /// A token carrying `expires_in` without `expires` is stamped before it
    /// is stored, so every persisted token has an absolute expiry.
    ///
    /// Persistence failures are logged, not returned: the in-memory token is
    /// already replaced and the flows never fail on storage.
    pub async fn write(&self, token: Token) {
        let token = match token.stamped(now_millis()) {
            Some(stamped) => {
                debug!(expires = stamped.expires, "stamping token expiry");
                stamped
            }
            None => token,
        };
        if let Err(e) = self.value.set(token).await {
            warn!(error = %e, "failed to persist token");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Token> {
        self.value.subscribe()
    }

    pub async fn storage_key(&self) -> String {
        self.value.key().await
    }

    /// Switch to another storage key, re-hydrating the token from it.
    pub async fn rotate_key(&self, key: String) -> Result<()> {
        self.value.rotate_key(key).await
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().authorization_header()
    }

    pub fn status(&self) -> AuthStatus {
        self.read().status()
    }

    pub fn is_authorized(&self) -> bool {
        self.status() == AuthStatus::Authorized
    }

    pub fn error(&self) -> Option<String> {
        self.read().error
    }

    pub fn has_error(&self) -> bool {
        self.error().is_some_and(|e| !e.is_empty())
    }

    pub fn error_description(&self) -> Option<String> {
        self.read().error_description
    }

    pub fn grant_type(&self) -> Option<GrantType> {
        self.read().grant_type
    }

    /// Stamp `expires` on a token hydrated from storage without one.
    /// Returns whether the token was re-written.
    pub async fn stamp_expiry(&self) -> bool {
        let token = self.read();
        if token.stamped(now_millis()).is_none() {
            return false;
        }
        self.write(token).await;
        true
    }

    /// Refresh the current token if it is expired.
    ///
    /// Single-flight: callers queue on a lock and re-check expiry after
    /// acquiring it, so a refresh that already landed is not repeated.
    /// Returns whether a new token was written.
    pub async fn refresh_if_expired(
        &self,
        http: &dyn HttpTransport,
        config: &OAuthConfig,
        trigger: &'static str,
    ) -> bool {
        let _guard = self.refresh_lock.lock().await;
        let current = self.read();
        if !current.is_expired() {
            return false;
        }

        debug!(trigger, "token expired, refreshing");
        record_refresh(trigger);
        let refreshed = grants::refresh(http, &current, config).await;
        if refreshed == current {
            debug!(trigger, "refresh produced no new token");
            return false;
        }

        self.write(refreshed).await;
        info!(trigger, "token refreshed");
        true
    }
}

/// Spawn the background effect that stamps and refreshes the token.
///
/// Handles the hydrated token first, then every subsequent write. Runs
/// until the handle is aborted.
pub fn spawn_token_watcher(
    store: Arc<TokenStore>,
    config: Arc<ConfigStore>,
    http: Arc<dyn HttpTransport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = store.subscribe();
        on_token_changed(&store, &config, http.as_ref()).await;

        while rx.changed().await.is_ok() {
            on_token_changed(&store, &config, http.as_ref()).await;
        }
        debug!("token watcher stopped");
    })
}

async fn on_token_changed(store: &TokenStore, config: &ConfigStore, http: &dyn HttpTransport) {
    if store.stamp_expiry().await {
        return;
    }
    if store.read().is_expired() {
        let config = config.config().await;
        store.refresh_if_expired(http, &config, "watcher").await;
    }
}
