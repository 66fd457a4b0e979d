//! Event payloads emitted during batch execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BatchCounts, ErrorKind};
use crate::state_machine::BatchState;

/// Lifecycle and progress events for one batch.
///
/// Ordering is guaranteed per task id (`TaskStarted` before its terminal
/// event); no ordering holds across task ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        batch_id: String,
        task_id: String,
        source_row_index: u32,
        attempt: u32,
    },
    TaskSucceeded {
        batch_id: String,
        task_id: String,
        source_row_index: u32,
        elapsed_ms: u64,
    },
    TaskFailed {
        batch_id: String,
        task_id: String,
        source_row_index: u32,
        error_kind: ErrorKind,
        error_detail: String,
    },
    BatchStateChanged {
        batch_id: String,
        from: Option<BatchState>,
        to: BatchState,
    },
    BatchProgress {
        batch_id: String,
        counts: BatchCounts,
        percent: f64,
        /// Naive remaining-time estimate from mean completed-task latency.
        estimated_remaining_ms: Option<u64>,
    },
}

impl ProgressEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            Self::TaskStarted { batch_id, .. }
            | Self::TaskSucceeded { batch_id, .. }
            | Self::TaskFailed { batch_id, .. }
            | Self::BatchStateChanged { batch_id, .. }
            | Self::BatchProgress { batch_id, .. } => batch_id,
        }
    }
}

/// An event with its publication timestamp, as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event: ProgressEvent,
    pub published_at: DateTime<Utc>,
}
