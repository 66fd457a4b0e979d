//! Task model: a single row's invocation against the remote workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error_kind::ErrorKind;
use crate::state_machine::TaskState;

/// Parameter name to scalar value, in sheet column order.
pub type TaskInputs = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub batch_id: String,
    /// 0-based row position in the unmodified input sheet. Unique within the
    /// batch; the stable alignment key for result assembly.
    pub source_row_index: u32,
    pub inputs: TaskInputs,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub external_run_id: Option<String>,
    pub output: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        batch_id: impl Into<String>,
        source_row_index: u32,
        inputs: TaskInputs,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            source_row_index,
            inputs,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts,
            external_run_id: None,
            output: None,
            error_kind: None,
            error_detail: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    /// Diagnostic text written into the `execution_result` cell for a task
    /// that did not succeed. Never blank, so misalignment stays visible.
    pub fn result_cell_text(&self) -> Option<String> {
        match self.state {
            TaskState::Succeeded => self.output.clone(),
            TaskState::Failed | TaskState::Cancelled => {
                let kind = self
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "cancelled".to_string());
                let detail = self.error_detail.clone().unwrap_or_default();
                Some(format!("[error:{kind}] {detail}").trim_end().to_string())
            }
            TaskState::Pending | TaskState::Running => None,
        }
    }
}
