//! Grant functions
//!
//! One stateless function per token endpoint interaction, plus revocation,
//! discovery, userinfo and introspection. Each maps (input, config) onto one
//! outbound request and normalizes the reply.
//!
//! None of these return errors. A missing precondition (an unset endpoint, a
//! token without the field the grant needs) short-circuits to the documented
//! fallback without touching the network. A rejected request substitutes the
//! server's JSON error body for the success data, so `{"error": ..}` replies
//! land in the token and drive the `DENIED` status; when there is no usable
//! body the fallback is returned instead.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::constants::{
    DISCOVERY_PATH, GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_PASSWORD,
    GRANT_REFRESH_TOKEN,
};
use crate::http::{HttpRequest, HttpTransport, response_body};
use crate::metrics::{OUTCOME_ERROR, OUTCOME_SKIPPED, OUTCOME_SUCCESS, record_grant};
use crate::token::{GrantType, Token};
use crate::types::{IntrospectInfo, OpenIdConfiguration, UserInfo};

/// Form body builder that drops absent and empty values.
#[derive(Default)]
struct Form(Vec<(String, String)>);

impl Form {
    fn new() -> Self {
        Self::default()
    }

    fn field(self, key: &str, value: &str) -> Self {
        self.optional(key, Some(value))
    }

    fn optional(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.0.push((key.to_string(), value.to_string()));
        }
        self
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

/// Execute `request`, record the outcome, and return whichever body applies.
async fn exchange(
    http: &dyn HttpTransport,
    grant: &'static str,
    request: HttpRequest,
) -> Option<Value> {
    let result = http.execute(request).await;
    match &result {
        Ok(response) => {
            debug!(grant, status = response.status, "grant request succeeded");
            record_grant(grant, OUTCOME_SUCCESS);
        }
        Err(e) => {
            warn!(grant, status = ?e.status(), error = %e.message, "grant request failed");
            record_grant(grant, OUTCOME_ERROR);
        }
    }
    response_body(result)
}

fn skipped(grant: &'static str, reason: &'static str) {
    debug!(grant, reason, "grant skipped");
    record_grant(grant, OUTCOME_SKIPPED);
}

fn parse<T: DeserializeOwned>(grant: &'static str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(grant, error = %e, "unexpected response shape");
            None
        }
    }
}

fn tagged(value: Value, grant_type: Option<GrantType>) -> Option<Token> {
    Token::from_value(value).map(|mut token| {
        token.grant_type = grant_type;
        token
    })
}

/// Exchange the refresh token for a new token, preserving the grant type.
///
/// Returns `token` unchanged when it has no refresh token, when no token
/// endpoint is configured, or when the request fails without a JSON body.
pub async fn refresh(http: &dyn HttpTransport, token: &Token, config: &OAuthConfig) -> Token {
    let (Some(refresh_token), Some(token_path)) = (
        token.refresh_token.as_deref().filter(|t| !t.is_empty()),
        config.token_path.as_deref(),
    ) else {
        skipped(GRANT_REFRESH_TOKEN, "no refresh token or token endpoint");
        return token.clone();
    };

    let form = Form::new()
        .optional("client_id", config.client_id.as_deref())
        .optional("client_secret", config.client_secret())
        .field("grant_type", GRANT_REFRESH_TOKEN)
        .field("refresh_token", refresh_token)
        .optional("scope", config.scope.as_deref());
    let request = HttpRequest::post_form(token_path, form.into_pairs());

    exchange(http, GRANT_REFRESH_TOKEN, request)
        .await
        .and_then(|body| tagged(body, token.grant_type))
        .unwrap_or_else(|| token.clone())
}

/// Exchange an authorization code (and PKCE verifier, if stashed).
///
/// Returns `token` unchanged when it carries no code, when no token
/// endpoint is configured, or when the request fails without a JSON body.
pub async fn authorize(http: &dyn HttpTransport, token: &Token, config: &OAuthConfig) -> Token {
    let (Some(code), Some(token_path)) = (
        token.code.as_deref().filter(|c| !c.is_empty()),
        config.token_path.as_deref(),
    ) else {
        skipped(GRANT_AUTHORIZATION_CODE, "no code or token endpoint");
        return token.clone();
    };

    let form = Form::new()
        .field("code", code)
        .optional("client_id", config.client_id.as_deref())
        .optional("client_secret", config.client_secret())
        .optional("redirect_uri", token.redirect_uri.as_deref())
        .field("grant_type", GRANT_AUTHORIZATION_CODE)
        .optional("scope", config.scope.as_deref())
        .optional("code_verifier", token.code_verifier.as_deref());
    let request = HttpRequest::post_form(token_path, form.into_pairs());

    exchange(http, GRANT_AUTHORIZATION_CODE, request)
        .await
        .and_then(|body| tagged(body, Some(GrantType::AuthorizationCode)))
        .unwrap_or_else(|| token.clone())
}

/// Client credentials grant. `None` when no token endpoint is configured.
pub async fn client_credential_login(
    http: &dyn HttpTransport,
    config: &OAuthConfig,
) -> Option<Token> {
    let Some(token_path) = config.token_path.as_deref() else {
        skipped(GRANT_CLIENT_CREDENTIALS, "no token endpoint");
        return None;
    };

    let form = Form::new()
        .optional("client_id", config.client_id.as_deref())
        .optional("client_secret", config.client_secret())
        .field("grant_type", GRANT_CLIENT_CREDENTIALS)
        .optional("scope", config.scope.as_deref());
    let request = HttpRequest::post_form(token_path, form.into_pairs());

    let body = exchange(http, GRANT_CLIENT_CREDENTIALS, request).await?;
    tagged(body, Some(GrantType::ClientCredentials))
}

/// Resource owner password grant. `None` without a token endpoint and a
/// client id.
pub async fn resource_owner_login(
    http: &dyn HttpTransport,
    username: &str,
    password: &str,
    config: &OAuthConfig,
) -> Option<Token> {
    let (Some(token_path), Some(client_id)) = (
        config.token_path.as_deref(),
        config.client_id.as_deref().filter(|c| !c.is_empty()),
    ) else {
        skipped(GRANT_PASSWORD, "no token endpoint or client id");
        return None;
    };

    let form = Form::new()
        .field("client_id", client_id)
        .optional("client_secret", config.client_secret())
        .field("grant_type", GRANT_PASSWORD)
        .optional("scope", config.scope.as_deref())
        .field("username", username)
        .field("password", password);
    let request = HttpRequest::post_form(token_path, form.into_pairs());

    let body = exchange(http, GRANT_PASSWORD, request).await?;
    tagged(body, Some(GrantType::ResourceOwnerPassword))
}

/// Revoke both halves of `token` at the revocation endpoint.
///
/// One POST per present half; each is attempted regardless of how the other
/// went. Skips silently without a revocation endpoint.
pub async fn revoke(http: &dyn HttpTransport, token: &Token, config: &OAuthConfig) {
    const GRANT: &str = "revoke";

    let Some(revoke_path) = config.revoke_path.as_deref() else {
        skipped(GRANT, "no revocation endpoint");
        return;
    };

    let halves = [
        (token.access_token.as_deref(), "access_token"),
        (token.refresh_token.as_deref(), "refresh_token"),
    ];
    for (value, hint) in halves {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        let form = Form::new()
            .optional("client_id", config.client_id.as_deref())
            .optional("client_secret", config.client_secret())
            .field("token", value)
            .field("token_type_hint", hint);
        let request = HttpRequest::post_form(revoke_path, form.into_pairs());
        exchange(http, GRANT, request).await;
    }
}

/// Fetch the OpenID discovery document of `issuer_path`.
pub async fn open_id_configuration(
    http: &dyn HttpTransport,
    config: &OAuthConfig,
) -> Option<OpenIdConfiguration> {
    const GRANT: &str = "discovery";

    let Some(issuer_path) = config.issuer_path.as_deref() else {
        skipped(GRANT, "no issuer");
        return None;
    };

    let mut url = format!("{}{DISCOVERY_PATH}", issuer_path.trim_end_matches('/'));
    if let Some(client_id) = config.client_id.as_deref() {
        url.push_str("?client_id=");
        url.push_str(&crate::flow::encode_component(client_id));
    }

    let body = exchange(http, GRANT, HttpRequest::get(url)).await?;
    parse(GRANT, body)
}

/// Fetch the user's claims from `user_path`.
///
/// `http` is normally the authorized client so the bearer token is attached.
pub async fn user_info(http: &dyn HttpTransport, config: &OAuthConfig) -> Option<UserInfo> {
    const GRANT: &str = "userinfo";

    let Some(user_path) = config.user_path.as_deref() else {
        skipped(GRANT, "no userinfo endpoint");
        return None;
    };

    let body = exchange(http, GRANT, HttpRequest::get(user_path)).await?;
    parse(GRANT, body)
}

/// RFC 7662 introspection of the current access token, authenticated with
/// HTTP Basic client credentials.
pub async fn introspect(
    http: &dyn HttpTransport,
    token: &Token,
    config: &OAuthConfig,
) -> Option<IntrospectInfo> {
    const GRANT: &str = "introspect";

    let (Some(introspection_path), Some(access_token), Some(client_id)) = (
        config.introspection_path.as_deref(),
        token.access_token.as_deref().filter(|t| !t.is_empty()),
        config.client_id.as_deref().filter(|c| !c.is_empty()),
    ) else {
        skipped(GRANT, "no introspection endpoint, access token or client id");
        return None;
    };

    let credentials = STANDARD.encode(format!(
        "{client_id}:{}",
        config.client_secret().unwrap_or_default()
    ));
    let mut request = HttpRequest::post_form(
        introspection_path,
        Form::new().field("token", access_token).into_pairs(),
    );
    match HeaderValue::from_str(&format!("Basic {credentials}")) {
        Ok(value) => {
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(e) => {
            warn!(error = %e, "client credentials are not a valid header value");
            record_grant(GRANT, OUTCOME_SKIPPED);
            return None;
        }
    }

    let body = exchange(http, GRANT, request).await?;
    parse(GRANT, body)
}
