//! Error taxonomy shared by the store, channel, and AI clients.
//!
//! Every failure that crosses a client boundary is a [`SyncError`]. The
//! variant decides how the rest of the pipeline treats it:
//!
//! | Variant | Retried | Typical source |
//! |---------|---------|----------------|
//! | `Config` | never | missing credentials, bad store domain, AI not configured |
//! | `Auth` | never | HTTP 401 / 403 |
//! | `Http` | 429 and 5xx only | any other non-success status |
//! | `Network` | yes | connect / timeout / body read errors |
//! | `Decode` | yes | malformed JSON from an upstream API |
//! | `AiResponse` | by the mapper's own loop | completion text that is not the expected JSON |
//! | `Rejected` | never | channel envelope with a non-zero `code` |

use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("unusable AI response: {0}")]
    AiResponse(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl SyncError {
    /// Classify a non-success HTTP status.
    ///
    /// The body is truncated to 500 characters so a large HTML error page
    /// does not flood the log.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message: String = body.chars().take(500).collect();
        match status {
            401 | 403 => Self::Auth { status, message },
            _ => Self::Http { status, message },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Decode(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) | Self::Auth { .. } | Self::AiResponse(_) | Self::Rejected(_) => false,
        }
    }
}

impl From<HttpError> for SyncError {
    fn from(e: HttpError) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_and_403_are_auth() {
        assert!(SyncError::from_status(401, "nope").is_auth());
        assert!(SyncError::from_status(403, "forbidden").is_auth());
        assert!(!SyncError::from_status(500, "boom").is_auth());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::from_status(503, "").is_retryable());
        assert!(SyncError::from_status(429, "").is_retryable());
        assert!(!SyncError::from_status(404, "").is_retryable());
        assert!(!SyncError::from_status(401, "").is_retryable());
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(!SyncError::Config("missing key".into()).is_retryable());
        assert!(!SyncError::Rejected("code 1".into()).is_retryable());
    }

    #[test]
    fn test_status_body_is_truncated() {
        let body = "x".repeat(2000);
        match SyncError::from_status(500, &body) {
            SyncError::Http { message, .. } => assert_eq!(message.len(), 500),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
