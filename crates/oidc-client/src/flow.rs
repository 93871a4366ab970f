//! Login, callback and logout flows
//!
//! Redirect steps do not block. `login` with authorization parameters and
//! `logout` with a redirect target return `FlowOutcome::Redirect`; the host
//! navigates, and the flow resumes in a fresh call to `oauth_callback` with
//! the URL the identity provider sent the user back to. Anything needed
//! across the redirect (nonce, PKCE verifier, redirect URI) is stashed in the
//! persisted token.
//!
//! Callback detection:
//! 1. Fragment carrying `access_token=` or `error=`: implicit grant. The
//!    fragment becomes the token after the nonce check.
//! 2. Query (or fragment) carrying `code=` or `error=`: authorization code.
//!    The parameters are merged over the stashed token and exchanged at the
//!    token endpoint.
//! 3. Anything else is ignored.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::OAuthClient;
use crate::constants::{CODE_CHALLENGE_METHOD, DEFAULT_OPENID_SCOPE, INVALID_NONCE};
use crate::error::{Error, Result};
use crate::grants;
use crate::pkce;
use crate::token::{GrantType, Token};
use crate::user::decode_jwt_claims;

/// Characters `encodeURIComponent` leaves alone: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// What the host must do after a flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Navigate to this URL. The flow continues in `oauth_callback`.
    Redirect(String),
    /// Nothing to navigate to; the token store holds the result.
    Done,
}

/// Parameters of an authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationParameters {
    /// Falls back to the configured `redirect_uri`
    pub redirect_uri: Option<String>,
    /// `code` or `token`
    pub response_type: String,
    pub state: Option<String>,
}

/// Input to `login`, selecting the grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginParameters {
    /// Resource owner password grant
    Resource { username: String, password: String },
    /// Authorization code or implicit grant, via redirect
    Authorization(AuthorizationParameters),
}

/// Split `key=value&..` pairs, percent-decoding both sides.
///
/// `+` is kept literally and pairs without `=` or with an empty key are
/// skipped. Values keep any further `=`. Later duplicates win.
pub fn parse_params(input: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for pair in input.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        params.insert(
            percent_decode_str(key).decode_utf8_lossy().into_owned(),
            Value::String(percent_decode_str(value).decode_utf8_lossy().into_owned()),
        );
    }
    params
}

/// Compare the `nonce` claim of the `id_token` in `received` with the nonce
/// stashed before the redirect.
///
/// Absent on both sides counts as a match. On mismatch the token is replaced
/// by `{error: "Invalid nonce"}`.
pub fn check_nonce(received: Token, stashed: Option<&str>) -> Token {
    let claimed = received
        .id_token
        .as_deref()
        .and_then(decode_jwt_claims)
        .and_then(|claims| claims.nonce)
        .filter(|n| !n.is_empty());
    let stashed = stashed.filter(|n| !n.is_empty());
    if claimed.as_deref() == stashed {
        received
    } else {
        warn!(
            claimed = claimed.is_some(),
            stashed = stashed.is_some(),
            "id_token nonce mismatch"
        );
        Token::from_error(INVALID_NONCE)
    }
}

fn parse_location(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl OAuthClient {
    /// Fill unset endpoints from the issuer's discovery document.
    ///
    /// Does nothing once a token endpoint is known, without an issuer, or
    /// when discovery fails.
    pub async fn autoconfig(&self) {
        let config = self.config.config().await;
        if config.token_path.is_some() || config.issuer_path.is_none() {
            return;
        }
        match grants::open_id_configuration(self.http.as_ref(), &config).await {
            Some(doc) => {
                self.config.apply_discovery(&doc).await;
                info!(issuer = ?doc.issuer, "applied discovery document");
            }
            None => warn!("discovery returned nothing, config unchanged"),
        }
    }

    /// Start a login.
    ///
    /// - `Resource` with a password: resource owner password grant
    /// - `Authorization` with a redirect URI and response type: returns the
    ///   authorization URL to navigate to
    /// - otherwise: client credentials grant
    ///
    /// A grant that yields nothing leaves the current token in place.
    pub async fn login(&self, parameters: Option<LoginParameters>) -> FlowOutcome {
        self.autoconfig().await;
        let config = self.config.config().await;

        let result = match parameters {
            Some(LoginParameters::Resource { username, password }) if !password.is_empty() => {
                debug!(grant = "password", "logging in");
                grants::resource_owner_login(self.http.as_ref(), &username, &password, &config)
                    .await
            }
            Some(LoginParameters::Authorization(params))
                if !params.response_type.is_empty()
                    && (non_empty(params.redirect_uri.as_deref()).is_some()
                        || non_empty(config.redirect_uri.as_deref()).is_some()) =>
            {
                return match self.authorization_url(&params).await {
                    Some(url) => FlowOutcome::Redirect(url),
                    None => FlowOutcome::Done,
                };
            }
            _ => {
                debug!(grant = "client_credentials", "logging in");
                grants::client_credential_login(self.http.as_ref(), &config).await
            }
        };

        match result {
            Some(token) => {
                info!(status = token.status().label(), "login complete");
                self.token.write(token).await;
            }
            None => debug!("login produced no token"),
        }
        FlowOutcome::Done
    }

    /// Build the authorization URL and stash what the callback will need.
    ///
    /// `None` when no authorization endpoint or redirect URI is known.
    pub async fn authorization_url(&self, params: &AuthorizationParameters) -> Option<String> {
        let config = self.config.config().await;
        let Some(authorize_path) = config.authorize_path.as_deref() else {
            warn!("no authorization endpoint configured");
            return None;
        };
        let Some(redirect_uri) = non_empty(params.redirect_uri.as_deref())
            .or(non_empty(config.redirect_uri.as_deref()))
        else {
            warn!("no redirect URI for the authorization request");
            return None;
        };
        let scope = config.scope.as_deref().unwrap_or_default();

        let mut url = String::from(authorize_path);
        url.push(if authorize_path.contains('?') { '&' } else { '?' });
        url.push_str(&format!(
            "client_id={}&redirect_uri={}&response_type={}&scope={}&state={}",
            encode_component(config.client_id.as_deref().unwrap_or_default()),
            encode_component(redirect_uri),
            encode_component(&params.response_type),
            encode_component(scope),
            encode_component(params.state.as_deref().unwrap_or_default()),
        ));

        let mut stash = self.token.read();
        stash.redirect_uri = Some(redirect_uri.to_string());

        if scope.contains(DEFAULT_OPENID_SCOPE) {
            let nonce = pkce::generate_nonce();
            url.push_str(&format!("&nonce={nonce}"));
            stash.nonce = Some(nonce);
        }
        if config.pkce == Some(true) {
            let verifier = pkce::generate_verifier();
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method={CODE_CHALLENGE_METHOD}",
                pkce::compute_challenge(&verifier)
            ));
            stash.code_verifier = Some(verifier);
        }

        self.token.write(stash).await;
        info!(response_type = %params.response_type, "redirecting to authorization endpoint");
        Some(url)
    }

    /// Handle the URL the identity provider redirected back to.
    ///
    /// Returns whether the URL carried a recognized response.
    pub async fn oauth_callback(&self, url: &str) -> bool {
        let location = match parse_location(url) {
            Ok(location) => location,
            Err(e) => {
                warn!(error = %e, "ignoring callback");
                return false;
            }
        };
        let fragment = location.fragment().unwrap_or_default();
        let query = location.query().unwrap_or_default();

        let is_implicit = fragment.contains("access_token=") || fragment.contains("error=");
        let is_code = [query, fragment]
            .iter()
            .any(|part| part.contains("code=") || part.contains("error="));

        if is_implicit {
            self.implicit_callback(fragment).await;
            true
        } else if is_code {
            let params = if query.is_empty() { fragment } else { query };
            let fallback_redirect = format!(
                "{}{}",
                location.origin().ascii_serialization(),
                location.path()
            );
            self.code_callback(params, fallback_redirect).await;
            true
        } else {
            debug!("callback URL carries no OAuth response");
            false
        }
    }

    async fn implicit_callback(&self, fragment: &str) {
        let params = parse_params(fragment);
        let state = params.get("state").and_then(Value::as_str).map(String::from);
        let received = Token::from_value(Value::Object(params)).unwrap_or_default();

        let stashed = self.token.read().nonce;
        let mut token = check_nonce(received, stashed.as_deref());
        token.grant_type = Some(GrantType::Implicit);

        info!(status = token.status().label(), "implicit callback handled");
        self.token.write(token).await;
        self.state.send_replace(state);
    }

    async fn code_callback(&self, query: &str, fallback_redirect: String) {
        let params = parse_params(query);
        let state = params.get("state").and_then(Value::as_str).map(String::from);

        // Parameters win over the stash; nonce and verifier survive
        let mut merged = match serde_json::to_value(self.token.read()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.extend(params);
        let mut token = Token::from_value(Value::Object(merged)).unwrap_or_default();
        token.grant_type = Some(GrantType::AuthorizationCode);

        self.token.write(token.clone()).await;
        self.state.send_replace(state);
        self.autoconfig().await;

        if token.redirect_uri.is_none() {
            token.redirect_uri = Some(fallback_redirect);
        }
        let config = self.config.config().await;
        let exchanged = grants::authorize(self.http.as_ref(), &token, &config).await;
        if exchanged == token {
            debug!("no code exchange performed");
            return;
        }

        let exchanged = check_nonce(exchanged, token.nonce.as_deref());
        info!(status = exchanged.status().label(), "authorization code exchanged");
        self.token.write(exchanged).await;
    }

    /// End the session.
    ///
    /// With a post-logout redirect (argument or configured) and an end
    /// session endpoint, clears the token and returns the end session URL.
    /// Otherwise revokes the token and clears it.
    pub async fn logout(&self, logout_redirect_uri: Option<&str>) -> FlowOutcome {
        self.autoconfig().await;
        let config = self.config.config().await;
        let token = self.token.read();
        self.clear_user();

        let redirect = non_empty(logout_redirect_uri).or(non_empty(config.logout_redirect_uri.as_deref()));
        if let (Some(redirect), Some(logout_path)) = (redirect, config.logout_path.as_deref()) {
            let mut params = Vec::new();
            if let Some(client_id) = config.client_id.as_deref() {
                params.push(format!("client_id={client_id}"));
            }
            params.push(format!("post_logout_redirect_uri={redirect}"));
            if let Some(id_token) = non_empty(token.id_token.as_deref()) {
                params.push(format!("id_token_hint={id_token}"));
            }
            let url = format!("{logout_path}?{}", params.join("&"));

            self.token.write(Token::default()).await;
            info!("redirecting to end session endpoint");
            return FlowOutcome::Redirect(url);
        }

        grants::revoke(self.http.as_ref(), &token, &config).await;
        self.token.write(Token::default()).await;
        info!("logged out");
        FlowOutcome::Done
    }
}
