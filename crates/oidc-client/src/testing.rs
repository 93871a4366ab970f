//! Recording transport for unit tests

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::http::{HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport};

/// Replays queued responses in order and records every request.
///
/// Requests made after the queue runs dry fail like a refused connection.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<HttpResult>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response; non-2xx statuses are queued as rejections.
    pub fn respond_json(&self, status: u16, data: Value) {
        let response = HttpResponse { status, data };
        let result = if (200..300).contains(&status) {
            Ok(response)
        } else {
            Err(HttpError {
                message: format!("status {status}"),
                response: Some(response),
            })
        };
        self.responses.lock().unwrap().push_back(result);
    }

    /// Queue a failure with no response at all.
    pub fn fail_network(&self, message: &str) {
        self.responses.lock().unwrap().push_back(Err(HttpError {
            message: message.into(),
            response: None,
        }));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: HttpRequest) -> Pin<Box<dyn Future<Output = HttpResult> + Send + '_>> {
        self.requests.lock().unwrap().push(request);
        let result = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(HttpError {
                message: "connection refused".into(),
                response: None,
            })
        });
        Box::pin(async move { result })
    }
}

/// Unsigned JWT carrying `claims` as its payload.
pub fn jwt_with(claims: Value) -> String {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("eyJhbGciOiJub25lIn0.{payload}.sig")
}
