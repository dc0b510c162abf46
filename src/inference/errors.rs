//! Inference error types.
//!
//! Errors fall into three buckets so callers can decide what to retry:
//! empty/invalid completions, backend-reported failures (HTTP status), and
//! unexpected transport failures.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The model returned neither text nor tool calls.
    #[error("empty response from model")]
    EmptyResponse,

    /// The response body could not be interpreted.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// Streamed tool-call fragments could not be merged.
    #[error("tool call merge error: {reason}")]
    ToolCallMergeError { reason: String },

    /// Every retry attempt failed; carries the last error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<InferenceError>,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether another attempt at the same request may succeed.
    ///
    /// Rate limiting (429) and server-side failures (5xx) are transient;
    /// other 4xx statuses indicate a malformed request and are surfaced as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::StreamError { .. }
                | InferenceError::EmptyResponse
                | InferenceError::HttpError { status: 429, .. }
                | InferenceError::HttpError { status: 500..=599, .. }
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_transport_errors() {
        assert!(InferenceError::ConnectionFailed {
            endpoint: "".into(),
            reason: "".into()
        }
        .is_retriable());
        assert!(InferenceError::Timeout { duration_secs: 60 }.is_retriable());
        assert!(InferenceError::EmptyResponse.is_retriable());
        assert!(InferenceError::StreamError {
            reason: "eof".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_retriable_http_statuses() {
        let status = |s: u16| InferenceError::HttpError {
            status: s,
            body: String::new(),
        };
        assert!(status(429).is_retriable());
        assert!(status(500).is_retriable());
        assert!(status(503).is_retriable());
        assert!(!status(400).is_retriable());
        assert!(!status(401).is_retriable());
        assert!(!status(404).is_retriable());
    }

    #[test]
    fn test_not_retriable_protocol_errors() {
        assert!(!InferenceError::ToolCallMergeError {
            reason: "no id".into()
        }
        .is_retriable());
        assert!(!InferenceError::InvalidResponse {
            reason: "bad json".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_error_body() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
        assert!(InferenceError::EmptyResponse.error_body().is_none());
    }

    #[test]
    fn test_retries_exhausted_display_includes_last() {
        let err = InferenceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(InferenceError::Timeout { duration_secs: 60 }),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("timeout"));
    }
}
