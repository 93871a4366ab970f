//! The client context
//!
//! `OAuthClient` bundles everything one identity needs: config, the current
//! token, the raw transport used for grant calls, and the authorized client
//! for application requests. Independent clients do not share state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::{ConfigStore, OAuthSettings};
use crate::error::Result;
use crate::grants;
use crate::http::HttpTransport;
use crate::interceptor::AuthorizedClient;
use crate::storage::Storage;
use crate::token::{self, AuthStatus, Token, TokenStore};
use crate::types::{IntrospectInfo, UserInfo};

/// OAuth2 / OpenID Connect client.
///
/// Flow operations live in `flow`, user profile access in `user`.
pub struct OAuthClient {
    pub(crate) config: Arc<ConfigStore>,
    pub(crate) token: Arc<TokenStore>,
    pub(crate) http: Arc<dyn HttpTransport>,
    pub(crate) authorized: AuthorizedClient,
    pub(crate) state: watch::Sender<Option<String>>,
    pub(crate) user: watch::Sender<Option<UserInfo>>,
}

impl OAuthClient {
    /// Build a client and hydrate its token from `storage`.
    ///
    /// A hydrated token still lacking `expires` is stamped here; later writes
    /// stamp themselves. Does not start the token watcher; call
    /// `spawn_token_watcher` for background refresh.
    pub async fn new(
        settings: OAuthSettings,
        storage: Arc<dyn Storage>,
        http: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let config = Arc::new(ConfigStore::new(settings));
        let key = config.storage_key().await;
        let token = Arc::new(TokenStore::load(storage, key.clone()).await?);
        token.stamp_expiry().await;
        info!(storage_key = %key, status = token.status().label(), "OAuth client ready");

        let authorized = AuthorizedClient::new(http.clone(), token.clone(), config.clone());
        let (state, _) = watch::channel(None);
        let (user, _) = watch::channel(None);
        Ok(Self {
            config,
            token,
            http,
            authorized,
            state,
            user,
        })
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.token
    }

    /// Client for application requests, carrying the current token.
    pub fn http(&self) -> &AuthorizedClient {
        &self.authorized
    }

    pub fn token(&self) -> Token {
        self.token.read()
    }

    pub fn status(&self) -> AuthStatus {
        self.token.status()
    }

    pub fn is_authorized(&self) -> bool {
        self.token.is_authorized()
    }

    /// `state` returned by the last callback, for the caller to compare
    /// against the value it sent.
    pub fn state(&self) -> Option<String> {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<String>> {
        self.state.subscribe()
    }

    /// Change the storage key and re-hydrate the token from it.
    pub async fn set_storage_key(&self, key: Option<String>) -> Result<()> {
        self.config.set_storage_key(key).await;
        let key = self.config.storage_key().await;
        self.token.rotate_key(key).await
    }

    /// Ask the introspection endpoint about the current access token.
    pub async fn introspect(&self) -> Option<IntrospectInfo> {
        let config = self.config.config().await;
        grants::introspect(self.http.as_ref(), &self.token.read(), &config).await
    }

    /// Start the background expiry stamping and refresh task.
    pub fn spawn_token_watcher(&self) -> tokio::task::JoinHandle<()> {
        token::spawn_token_watcher(self.token.clone(), self.config.clone(), self.http.clone())
    }
}
