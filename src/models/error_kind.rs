//! Task-level error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a task failure. The kind decides retry behavior and is
/// rendered into the output sheet as `[error:<kind>] <detail>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input row rejected at parse; surfaces at batch creation.
    Validation,
    /// Connect/TLS/read failure before a response was obtained.
    Transport,
    /// Per-call deadline exceeded.
    Timeout,
    /// HTTP 5xx, 408 or 429.
    Retryable,
    /// Any other HTTP 4xx.
    Permanent,
    /// HTTP 2xx whose body reported `status = failed`.
    Application,
    /// Malformed remote response.
    Protocol,
    /// Batch cancelled while the task was pending or running.
    Cancelled,
}

impl ErrorKind {
    /// Whether the dispatcher may re-dispatch a task that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Timeout | Self::Retryable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Retryable => "retryable",
            Self::Permanent => "permanent",
            Self::Application => "application",
            Self::Protocol => "protocol",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(Self::Validation),
            "transport" => Ok(Self::Transport),
            "timeout" => Ok(Self::Timeout),
            "retryable" => Ok(Self::Retryable),
            "permanent" => Ok(Self::Permanent),
            "application" => Ok(Self::Application),
            "protocol" => Ok(Self::Protocol),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid error kind: {s}")),
        }
    }
}
