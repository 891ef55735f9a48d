//! Error types for the triage pipeline.
//!
//! Only transport, configuration and persistence failures are Rust errors.
//! Analysis outcomes such as missing source or an unreachable node for a single
//! fact are values recorded on the target's finding.

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("{0}")]
    Rpc(RpcError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured RPC error types for programmatic handling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("Connection to {url} failed: {cause}")]
    ConnectionFailed { url: String, cause: String },

    #[error("{method} timed out after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u64 },

    #[error("{method} HTTP {status}: {body}")]
    HttpError {
        method: String,
        status: u16,
        body: String,
    },

    #[error("{method} JSON-RPC error {code}: {message}")]
    JsonRpcError {
        method: String,
        code: i64,
        message: String,
        /// Hex `data` member of the error object, carries revert payloads.
        data: Option<String>,
    },

    #[error("{method} response parse error in {field}: {cause}")]
    ParseError {
        method: String,
        field: String,
        cause: String,
    },

    #[error("{method} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        method: String,
        attempts: u32,
        last_error: Box<RpcError>,
    },
}

impl RpcError {
    /// Whether this error is likely transient and retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::ConnectionFailed { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::HttpError { status, .. } => {
                // 429 = rate limited, 502/503/504 = server issues
                matches!(*status, 429 | 502 | 503 | 504)
            }
            RpcError::JsonRpcError { .. } => false,
            RpcError::ParseError { .. } => false,
            RpcError::RetryExhausted { .. } => false,
        }
    }

    /// Whether the endpoint refused us for exceeding its quota, possibly after retries.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RpcError::HttpError { status, .. } => *status == 429,
            RpcError::RetryExhausted { last_error, .. } => last_error.is_rate_limited(),
            _ => false,
        }
    }

    /// For HTTP 429, extract Retry-After header value (if available).
    pub fn retry_after_secs(&self) -> Option<u64> {
        // Retry-After is captured in the body field as a hint
        if let RpcError::HttpError {
            status: 429, body, ..
        } = self
        {
            body.strip_prefix("retry-after:")
                .and_then(|s| s.trim().parse().ok())
        } else {
            None
        }
    }

    pub(crate) fn parse(method: &str, field: &str, cause: impl Into<String>) -> Self {
        RpcError::ParseError {
            method: method.into(),
            field: field.into(),
            cause: cause.into(),
        }
    }
}

impl From<RpcError> for TriageError {
    fn from(e: RpcError) -> Self {
        TriageError::Rpc(e)
    }
}
