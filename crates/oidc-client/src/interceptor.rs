//! Authorized HTTP client
//!
//! Wraps a raw transport with two hooks that run on every request:
//!
//! - request: unless the URL matches an ignored-path pattern, refresh the
//!   token if it has expired, then attach `Authorization: {type} {token}`
//! - response: on 401, the response body replaces the current token and the
//!   rejection is passed on to the caller. A body without an OAuth `error`
//!   still leaves the token denied.
//!
//! Refreshes go through the raw transport, never through this client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::constants::{JSON_CONTENT_TYPE, UNAUTHORIZED};
use crate::http::{HttpRequest, HttpResult, HttpTransport};
use crate::token::{Token, TokenStore};

/// Metric label for refreshes triggered by an outgoing request.
const REFRESH_TRIGGER: &str = "interceptor";

/// HTTP client that carries the current token.
#[derive(Clone)]
pub struct AuthorizedClient {
    inner: Arc<dyn HttpTransport>,
    token: Arc<TokenStore>,
    config: Arc<ConfigStore>,
}

impl AuthorizedClient {
    pub fn new(
        inner: Arc<dyn HttpTransport>,
        token: Arc<TokenStore>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            inner,
            token,
            config,
        }
    }

    /// Request hook.
    pub async fn intercept_request(&self, mut request: HttpRequest) -> HttpRequest {
        if self.config.is_path_ignored(&request.url).await {
            debug!(url = %request.url, "path ignored, sending without credentials");
            return request;
        }

        if self.token.read().is_expired() {
            let config = self.config.config().await;
            self.token
                .refresh_if_expired(self.inner.as_ref(), &config, REFRESH_TRIGGER)
                .await;
        }

        if let Some(header) = self.token.access_token() {
            match HeaderValue::from_str(&header) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "access token is not a valid header value"),
            }
        }
        request
    }

    /// Response hook.
    pub async fn intercept_response(&self, result: HttpResult) -> HttpResult {
        if let Err(err) = &result
            && err.status() == Some(401)
        {
            let mut token = err
                .response
                .as_ref()
                .and_then(|response| Token::from_value(response.data.clone()))
                .unwrap_or_default();
            if token.error.as_deref().is_none_or(str::is_empty) {
                token.error = Some(UNAUTHORIZED.to_string());
            }
            warn!(error = ?token.error, "request unauthorized, replacing token");
            self.token.write(token).await;
        }
        result
    }

    /// Send `request` through both hooks.
    pub async fn send(&self, mut request: HttpRequest) -> HttpResult {
        if !request.headers.contains_key(CONTENT_TYPE) {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        let request = self.intercept_request(request).await;
        let result = self.inner.execute(request).await;
        self.intercept_response(result).await
    }

    pub async fn get(&self, url: &str) -> HttpResult {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn post_json(&self, url: &str, body: Value) -> HttpResult {
        self.send(HttpRequest::post_json(url, body)).await
    }
}

impl HttpTransport for AuthorizedClient {
    fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = HttpResult> + Send + '_>> {
        Box::pin(self.send(request))
    }
}
