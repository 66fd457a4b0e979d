//! Remote client error types and their mapping onto the task error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::models::ErrorKind;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed remote response: {0}")]
    Protocol(String),

    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Convert a reqwest failure, distinguishing the per-call deadline from
    /// other transport problems.
    pub fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Transport(error.to_string())
        }
    }

    /// Map onto the task error taxonomy:
    /// transport/connect/TLS/read -> `transport`, deadline -> `timeout`,
    /// HTTP 5xx/408/429 -> `retryable`, other 4xx -> `permanent`,
    /// malformed body -> `protocol`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Http { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    ErrorKind::Retryable
                } else {
                    ErrorKind::Permanent
                }
            }
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Configuration(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ClientError {
        ClientError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(http(500).kind(), ErrorKind::Retryable);
        assert_eq!(http(503).kind(), ErrorKind::Retryable);
        assert_eq!(http(408).kind(), ErrorKind::Retryable);
        assert_eq!(http(429).kind(), ErrorKind::Retryable);
        assert_eq!(http(400).kind(), ErrorKind::Permanent);
        assert_eq!(http(404).kind(), ErrorKind::Permanent);
        assert_eq!(http(422).kind(), ErrorKind::Permanent);
    }

    #[test]
    fn transport_and_timeout_mapping() {
        assert_eq!(
            ClientError::Transport("refused".to_string()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(30)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ClientError::Protocol("bad json".to_string()).kind(),
            ErrorKind::Protocol
        );
    }
}
