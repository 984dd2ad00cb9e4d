// src/error.rs

//! Unified error handling for the relay.
//!
//! Every failure is mapped onto an [`ErrorKind`] so the run loop can decide
//! whether to retry, skip, self-heal or degrade without matching on
//! individual variants.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse classification used by the transport policy and the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, resets, 5xx and 429. Retried with backoff.
    TransientNetwork,
    /// 4xx on fetch/download. Never retried, the item is skipped.
    PermanentClient,
    /// A platform no longer resolves a remembered thread/message.
    NotFoundOnUpdate,
    /// Summarizer or analyzer failed; a placeholder is used instead.
    IntegrationDegraded,
    /// Anything else. Logged and the current post is skipped.
    Unexpected,
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// A response with a non-success status that is not worth retrying.
    #[error("{context} failed with status {status}: {body}")]
    Status {
        context: String,
        status: u16,
        body: String,
    },

    /// Retries were exhausted on a transient failure.
    #[error("{context} gave up after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        context: String,
        attempts: u32,
        message: String,
        retry_after: Option<Duration>,
    },

    /// A platform rejected a reply because the remembered target is gone.
    #[error("{platform} no longer knows {target}")]
    StaleReference { platform: String, target: String },

    /// An AI collaborator is unavailable or out of quota.
    #[error("{integration} degraded: {message}")]
    Degraded {
        integration: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A platform answered with something we could not interpret
    #[error("Unexpected response from {context}: {message}")]
    Protocol { context: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an integration-degraded error.
    pub fn degraded(integration: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Degraded {
            integration: integration.into(),
            message: message.to_string(),
        }
    }

    /// Create a protocol error with context.
    pub fn protocol(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Protocol {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a status error with context.
    pub fn status(context: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            context: context.into(),
            status,
            body: body.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Map this error onto the taxonomy the run loop reasons about.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorKind::TransientNetwork
            }
            Self::Http(e) => match e.status() {
                Some(s) if s.is_server_error() || s.as_u16() == 429 => {
                    ErrorKind::TransientNetwork
                }
                Some(s) if s.is_client_error() => ErrorKind::PermanentClient,
                _ => ErrorKind::Unexpected,
            },
            Self::Status { status, .. } => match *status {
                429 | 500..=599 => ErrorKind::TransientNetwork,
                400..=499 => ErrorKind::PermanentClient,
                _ => ErrorKind::Unexpected,
            },
            Self::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                ErrorKind::TransientNetwork
            }
            Self::RetriesExhausted { .. } => ErrorKind::TransientNetwork,
            Self::StaleReference { .. } => ErrorKind::NotFoundOnUpdate,
            Self::Degraded { .. } => ErrorKind::IntegrationDegraded,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Whether the transport policy should try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientNetwork)
            && !matches!(self, Self::RetriesExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_map_to_taxonomy() {
        assert_eq!(
            AppError::status("fetch", 503, "").kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            AppError::status("fetch", 429, "").kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            AppError::status("fetch", 404, "").kind(),
            ErrorKind::PermanentClient
        );
        assert_eq!(
            AppError::status("fetch", 403, "").kind(),
            ErrorKind::PermanentClient
        );
    }

    #[test]
    fn exhausted_retries_are_not_retried_again() {
        let err = AppError::RetriesExhausted {
            context: "sendMessage".into(),
            attempts: 3,
            message: "503".into(),
            retry_after: None,
        };
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert!(!err.is_retryable());
        assert!(AppError::status("x", 502, "").is_retryable());
    }

    #[test]
    fn stale_and_degraded_kinds() {
        let stale = AppError::StaleReference {
            platform: "discord".into(),
            target: "123".into(),
        };
        assert_eq!(stale.kind(), ErrorKind::NotFoundOnUpdate);
        assert_eq!(
            AppError::degraded("summarizer", "quota").kind(),
            ErrorKind::IntegrationDegraded
        );
        assert_eq!(AppError::config("x").kind(), ErrorKind::Unexpected);
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(AppError::from(reset).is_retryable());
    }
}
