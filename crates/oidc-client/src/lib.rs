//! OAuth2 / OpenID Connect client library
//!
//! Drives the four standard grants (authorization code with optional PKCE,
//! implicit, resource owner password, client credentials) around a single
//! persisted token, with OIDC discovery, automatic expiry stamping and
//! refresh, and an HTTP client that attaches the bearer token.
//!
//! Login with a redirect:
//! 1. Host calls `OAuthClient::login` with `LoginParameters::Authorization`
//! 2. Client stashes nonce / PKCE verifier in the token and returns
//!    `FlowOutcome::Redirect(url)`; the host navigates there
//! 3. Identity provider redirects back; host passes that URL to
//!    `OAuthClient::oauth_callback`
//! 4. Client validates the nonce, exchanges the code if needed and stores
//!    the token
//! 5. Stored tokens carry an absolute `expires`; `spawn_token_watcher`
//!    refreshes on expiry and `OAuthClient::http` attaches `Authorization`
//!    to application requests
//!
//! The HTTP library and the storage backend are injected (`HttpTransport`,
//! `Storage`), so every flow runs unchanged against test doubles.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod grants;
pub mod http;
pub mod interceptor;
pub mod metrics;
pub mod pkce;
pub mod storage;
pub mod token;
pub mod types;
pub mod user;

#[cfg(test)]
mod testing;

pub use client::OAuthClient;
pub use config::{ConfigStore, OAuthConfig, OAuthSettings};
pub use error::{Error, Result};
pub use flow::{AuthorizationParameters, FlowOutcome, LoginParameters};
pub use http::{HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport, ReqwestTransport};
pub use interceptor::AuthorizedClient;
pub use storage::{FileStorage, MemoryStorage, Storage, StoredValue};
pub use token::{AuthStatus, GrantType, Token, TokenStore, spawn_token_watcher};
pub use types::{IntrospectInfo, OpenIdConfiguration, UserInfo};
