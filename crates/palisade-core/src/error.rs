use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Palisade.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed before a status was available.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The target signalled a rate limit (HTTP 429 or equivalent).
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    /// Network/connection error. `code` carries a machine tag such as `ECONNRESET`.
    #[error("Network error: {message}")]
    NetworkError {
        code: Option<String>,
        message: String,
    },

    /// Failure attributed to a specific egress route.
    #[error("Proxy error ({proxy}): {message}")]
    ProxyError { proxy: String, message: String },

    /// Failure raised by caller-supplied operation code.
    #[error("{message}")]
    Operation {
        code: Option<String>,
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input failed validation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Circuit is open; the operation was not invoked.
    #[error("Circuit breaker '{name}' is open. Retry after {retry_ms} ms.", retry_ms = .retry_after.as_millis())]
    CircuitOpen { name: String, retry_after: Duration },

    /// The request queue is at capacity; the operation was not queued.
    #[error("Request queue is full ({max_size} pending)")]
    QueueFull { max_size: usize },

    /// The request queue was cleared before the operation ran.
    #[error("Request queue was cleared")]
    QueueCleared,

    /// The operation was dropped or panicked before producing a result.
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// The optional fields error classification looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignals<'a> {
    pub code: Option<&'a str>,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl AppError {
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::NetworkError {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        AppError::Operation {
            code: None,
            message: message.into(),
        }
    }

    pub fn operation_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Operation {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        AppError::HttpStatus {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Machine-readable tag, if the error carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            AppError::NetworkError { code, .. } | AppError::Operation { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    /// HTTP status, if the failure was HTTP-shaped.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::HttpStatus { status, .. } => Some(*status),
            AppError::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }

    /// Server-supplied retry-after hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::HttpStatus { retry_after, .. }
            | AppError::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn signals(&self) -> FailureSignals<'_> {
        FailureSignals {
            code: self.code(),
            status: self.status(),
            message: self.to_string(),
            retry_after: self.retry_after(),
        }
    }

    /// Returns true when the control plane chose not to run the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::CircuitOpen { .. } | AppError::QueueFull { .. } | AppError::QueueCleared
        )
    }
}
