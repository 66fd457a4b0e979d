//! Batch model: one input sheet executed against one binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::BatchState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub binding_id: String,
    /// Opaque reference to the uploaded file (name or storage key).
    pub source_file_ref: String,
    pub state: BatchState,
    pub concurrency_limit: usize,
    pub max_attempts: u32,
    /// User-supplied template expression applied by the presentation layer;
    /// carried through unrendered.
    pub result_template: Option<String>,
    pub total: u32,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(
        binding_id: impl Into<String>,
        source_file_ref: impl Into<String>,
        concurrency_limit: usize,
        max_attempts: u32,
        result_template: Option<String>,
        total: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            binding_id: binding_id.into(),
            source_file_ref: source_file_ref.into(),
            state: BatchState::Created,
            concurrency_limit,
            max_attempts,
            result_template,
            total,
            error_detail: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Aggregate task counts for a batch. At any quiescent instant this equals
/// the per-state tally over the batch's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl BatchCounts {
    /// A batch with no pending or running work is drained and may complete.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn terminal(&self) -> u32 {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.terminal() as f64 / self.total as f64) * 100.0
    }
}

/// Read model returned by `get_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub id: String,
    pub binding_id: String,
    pub state: BatchState,
    pub counts: BatchCounts,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
