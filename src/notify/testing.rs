//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};

use super::transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::error::{AppError, Result};

enum Scripted {
    Response(ApiResponse),
    Failure(std::io::ErrorKind),
}

/// Records every request and answers from a queue of one-shot rules.
///
/// A rule matches when its pattern occurs in the request URL; the first
/// matching rule is consumed. Unmatched requests get `200` with a body that
/// satisfies both chat APIs: `{"ok":true,"result":{"message_id":N},"id":"N"}`.
pub struct FakeTransport {
    rules: Mutex<VecDeque<(String, Scripted)>>,
    requests: Mutex<Vec<ApiRequest>>,
    next_id: AtomicU64,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    /// Queue a JSON response for the next request whose URL contains `pattern`.
    pub fn respond(&self, pattern: &str, status: u16, body: Value) {
        self.respond_with(
            pattern,
            ApiResponse {
                status,
                headers: Vec::new(),
                body: body.to_string().into_bytes(),
            },
        );
    }

    pub fn respond_with(&self, pattern: &str, response: ApiResponse) {
        self.push(pattern, Scripted::Response(response));
    }

    /// Queue a connection-level failure.
    pub fn fail(&self, pattern: &str, kind: std::io::ErrorKind) {
        self.push(pattern, Scripted::Failure(kind));
    }

    fn push(&self, pattern: &str, scripted: Scripted) {
        self.rules
            .lock()
            .unwrap()
            .push_back((pattern.to_string(), scripted));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL contains `pattern`, excluding GET/HEAD downloads.
    pub fn posts_to(&self, pattern: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::POST && r.url.contains(pattern))
            .collect()
    }

    /// `"METHOD url"` for each request, in order.
    pub fn log(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.url))
            .collect()
    }

    fn default_response(&self) -> ApiResponse {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        ApiResponse {
            status: 200,
            headers: Vec::new(),
            body: json!({"ok": true, "result": {"message_id": id}, "id": id.to_string()})
                .to_string()
                .into_bytes(),
        }
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = {
            let mut rules = self.rules.lock().unwrap();
            let position = rules
                .iter()
                .position(|(pattern, _)| request.url.contains(pattern.as_str()));
            position.and_then(|idx| rules.remove(idx))
        };

        match scripted {
            Some((_, Scripted::Response(response))) => Ok(response),
            Some((_, Scripted::Failure(kind))) => {
                Err(AppError::Io(std::io::Error::new(kind, "scripted failure")))
            }
            None => Ok(self.default_response()),
        }
    }
}
