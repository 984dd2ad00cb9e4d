//! Outbound HTTP with retry, backoff and rate-limit hints.
//!
//! Requests are plain data ([`ApiRequest`]) so they can be replayed across
//! attempts and recorded by test transports. [`TransportPolicy`] owns the
//! retry loop; an [`ApiTransport`] only performs a single exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::TransportConfig;

/// Body of an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FormPart>),
}

/// One multipart form field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File { filename: String, bytes: Vec<u8> },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: PartValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value: PartValue::File {
                filename: filename.into(),
                bytes,
            },
        }
    }
}

/// A replayable HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    fn new(method: Method, url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, RequestBody::Empty)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url, RequestBody::Empty)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url, RequestBody::Json(body))
    }

    pub fn post_multipart(url: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self::new(Method::POST, url, RequestBody::Multipart(parts))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// JSON body, if any. Multipart `payload_json` parts are decoded too.
    pub fn json_body(&self) -> Option<Value> {
        match &self.body {
            RequestBody::Json(value) => Some(value.clone()),
            RequestBody::Multipart(parts) => parts.iter().find_map(|p| match &p.value {
                PartValue::Text(text) if p.name == "payload_json" => {
                    serde_json::from_str(text).ok()
                }
                _ => None,
            }),
            RequestBody::Empty => None,
        }
    }

    /// Text value of a multipart field.
    pub fn form_text(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Multipart(parts) => parts.iter().find_map(|p| match &p.value {
                PartValue::Text(text) if p.name == name => Some(text.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Filenames of multipart file fields, in order.
    pub fn filenames(&self) -> Vec<&str> {
        match &self.body {
            RequestBody::Multipart(parts) => parts
                .iter()
                .filter_map(|p| match &p.value {
                    PartValue::File { filename, .. } => Some(filename.as_str()),
                    PartValue::Text(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A response with any status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Server-provided wait before the next attempt.
    ///
    /// Checks the `Retry-After` header, then a JSON `retry_after` field
    /// (Discord), then `parameters.retry_after` (Telegram). All in seconds,
    /// capped at [`MAX_RETRY_HINT_SECS`].
    pub fn retry_after(&self) -> Option<Duration> {
        let from_header = self
            .header("retry-after")
            .and_then(|v| v.trim().parse::<f64>().ok());

        let from_body = || {
            let json: Value = serde_json::from_slice(&self.body).ok()?;
            json.get("retry_after")
                .or_else(|| json.pointer("/parameters/retry_after"))
                .and_then(Value::as_f64)
        };

        from_header
            .or_else(from_body)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs.min(MAX_RETRY_HINT_SECS)).ok())
    }
}

/// Longest server retry hint honoured.
pub const MAX_RETRY_HINT_SECS: f64 = 3600.0;

/// Performs a single HTTP exchange. Non-2xx statuses are not errors here.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// [`ApiTransport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(to_form(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn to_form(parts: &[FormPart]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match &part.value {
            PartValue::Text(text) => form.text(part.name.clone(), text.clone()),
            PartValue::File { filename, bytes } => {
                let mime = mime_guess::from_path(filename).first_or_octet_stream();
                let file = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(mime.as_ref())?;
                form.part(part.name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Shared retry/backoff executor.
///
/// 2xx responses are returned. 429 and 5xx responses and transient network
/// errors are retried with exponential backoff, never sooner than a
/// server-provided retry hint. Other statuses fail immediately with
/// [`AppError::Status`].
#[derive(Clone)]
pub struct TransportPolicy {
    transport: Arc<dyn ApiTransport>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl TransportPolicy {
    pub fn new(transport: Arc<dyn ApiTransport>, config: &TransportConfig) -> Self {
        Self {
            transport,
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Computed backoff before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run `request` until it succeeds, fails permanently, or attempts run out.
    pub async fn execute(&self, context: &str, request: &ApiRequest) -> Result<ApiResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let (error, hint) = match self.transport.send(request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 429 || response.status >= 500 => {
                    let hint = response.retry_after();
                    let error = AppError::status(context, response.status, response.text());
                    (error, hint)
                }
                Ok(response) => {
                    return Err(AppError::status(context, response.status, response.text()));
                }
                Err(e) if e.is_retryable() => (e, None),
                Err(e) => return Err(e),
            };

            if attempt >= self.max_attempts {
                return Err(AppError::RetriesExhausted {
                    context: context.to_string(),
                    attempts: attempt,
                    message: error.to_string(),
                    retry_after: hint,
                });
            }

            let backoff = self.backoff(attempt);
            let delay = hint.map_or(backoff, |h| h.max(backoff));
            log::warn!(
                "{} attempt {}/{} failed ({}); retrying in {:?}",
                context,
                attempt,
                self.max_attempts,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
