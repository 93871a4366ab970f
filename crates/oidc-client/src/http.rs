//! Outbound HTTP seam
//!
//! The core never talks to `reqwest` directly. Grant functions and the
//! authorized client issue `HttpRequest`s through an injected
//! `HttpTransport`, which resolves to an `HttpResponse` on 2xx and rejects
//! with an `HttpError` otherwise. A rejected call carries the server's
//! response when there was one, so callers can substitute its body for
//! success data.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::constants::{FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};
use crate::error::{Error, Result};

/// Request body variants the core produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `application/x-www-form-urlencoded` pairs, in insertion order
    Form(Vec<(String, String)>),
    Json(Value),
}

/// An outbound request before it reaches the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A form POST with the headers every grant call sends.
    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(Body::Form(form)),
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Some(Body::Json(body)),
        }
    }

    /// Form value for `key`, if this is a form request carrying it.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Some(Body::Form(pairs)) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Status and parsed body of a completed exchange.
///
/// `data` is the JSON body, `Value::String` for a non-JSON body, or
/// `Value::Null` when the body was empty.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub data: Value,
}

/// Rejection from the transport: network failure (`response` is `None`) or a
/// non-2xx status (`response` holds what the server sent).
#[derive(Debug, Clone, thiserror::Error)]
#[error("HTTP request failed: {message}")]
pub struct HttpError {
    pub message: String,
    pub response: Option<HttpResponse>,
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Result of a single transport call.
pub type HttpResult = std::result::Result<HttpResponse, HttpError>;

/// Abstraction over the HTTP library.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn HttpTransport>`).
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = HttpResult> + Send + '_>>;
}

/// Body of a call regardless of outcome: the success data, or the failure
/// response's data when the server sent a JSON object back.
///
/// Returns `None` for network failures and for error responses without a
/// usable body, which is where callers fall back to their documented value.
pub fn response_body(result: HttpResult) -> Option<Value> {
    match result {
        Ok(response) => Some(response.data).filter(|data| !data.is_null()),
        Err(err) => err
            .response
            .map(|response| response.data)
            .filter(Value::is_object),
    }
}

/// `HttpTransport` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a transport whose requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::new(client))
    }

    async fn send(&self, request: HttpRequest) -> HttpResult {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        builder = match request.body {
            Some(Body::Form(pairs)) => builder.form(&pairs),
            Some(Body::Json(value)) => builder.json(&value),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| HttpError {
            message: format!("{} {} failed: {e}", request.method, request.url),
            response: None,
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| HttpError {
            message: format!("reading response body from {}: {e}", request.url),
            response: None,
        })?;
        let data = parse_body(&bytes);
        debug!(method = %request.method, url = %request.url, status = status.as_u16(), "HTTP exchange complete");

        let response = HttpResponse {
            status: status.as_u16(),
            data,
        };
        if status.is_success() {
            Ok(response)
        } else {
            Err(HttpError {
                message: format!("{} returned {status}", request.url),
                response: Some(response),
            })
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = HttpResult> + Send + '_>> {
        Box::pin(self.send(request))
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
