//! Events driving the batch and task state machines.

use serde::{Deserialize, Serialize};

use crate::models::ErrorKind;

/// Commands applied to a batch by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEvent {
    /// `created|paused -> running`
    Start,
    /// `running -> paused`
    Pause,
    /// `paused -> running`
    Resume,
    /// any non-terminal `-> cancelling`
    Cancel,
    /// `running|cancelling -> completed`, automatic once drained
    Complete,
    /// `-> failed`, unrecoverable coordinator error
    Fail(String),
}

impl BatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
        }
    }
}

/// Transitions applied to a task by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// `pending -> running`, atomic claim
    Claim,
    /// `running -> succeeded`
    Succeed,
    /// `running -> failed`
    Fail(ErrorKind),
    /// `running -> pending`, retryable failure re-enqueued after backoff
    Requeue,
    /// `pending|running -> cancelled`
    Cancel,
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Succeed => "succeed",
            Self::Fail(_) => "fail",
            Self::Requeue => "requeue",
            Self::Cancel => "cancel",
        }
    }
}
