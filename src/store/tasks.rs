//! Task persistence: atomic claim, terminal transitions, recovery.
//!
//! Terminal transitions are guarded on the current state so a cancellation
//! sweep racing a worker can never overwrite a terminal row.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;
use crate::models::{ErrorKind, Task, TaskInputs};
use crate::state_machine::TaskState;
use crate::Result;

const TASK_COLUMNS: &str = "id, batch_id, source_row_index, inputs, state, attempts, \
     max_attempts, external_run_id, output, error_kind, error_detail, \
     started_at, finished_at, created_at";

impl Store {
    /// Claim the pending task with the lowest `source_row_index`, moving it
    /// to `running`. The single UPDATE makes the claim atomic across
    /// workers. Returns `None` when the batch has no pending work.
    pub async fn claim_next_task(&self, batch_id: &str) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET state = 'running', started_at = ?2
            WHERE id = (
                SELECT id FROM tasks
                WHERE batch_id = ?1 AND state = 'pending'
                ORDER BY source_row_index ASC
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(batch_id)
            .bind(Utc::now())
            .fetch_optional(self.pool())
            .await?;
        row.map(task_from_row).transpose()
    }

    /// Count one remote-call dispatch. Returns the new attempt number.
    pub async fn record_attempt(&self, task_id: &str) -> Result<u32> {
        let row = sqlx::query("UPDATE tasks SET attempts = attempts + 1 WHERE id = ?1 RETURNING attempts")
            .bind(task_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get::<i64, _>("attempts")? as u32)
    }

    /// Record a run id as soon as the remote accepted the call, so restart
    /// recovery can tell which attempts may have actually run remotely.
    pub async fn record_external_run_id(&self, task_id: &str, external_run_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET external_run_id = ?2 WHERE id = ?1")
            .bind(task_id)
            .bind(external_run_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// `running -> succeeded`. Returns false if the task was no longer
    /// running (e.g. swept by cancellation).
    pub async fn complete_task_success(
        &self,
        task_id: &str,
        output: &str,
        external_run_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'succeeded', output = ?2, error_kind = NULL,
                error_detail = NULL, external_run_id = COALESCE(?3, external_run_id),
                finished_at = ?4
            WHERE id = ?1 AND state = 'running'
            "#,
        )
        .bind(task_id)
        .bind(output)
        .bind(external_run_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `running -> failed` with the recorded error kind.
    pub async fn complete_task_failure(
        &self,
        task_id: &str,
        kind: ErrorKind,
        detail: &str,
        external_run_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'failed', error_kind = ?2, error_detail = ?3,
                external_run_id = COALESCE(?4, external_run_id), finished_at = ?5
            WHERE id = ?1 AND state = 'running'
            "#,
        )
        .bind(task_id)
        .bind(kind.to_string())
        .bind(detail)
        .bind(external_run_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `running -> pending` after a retryable failure's backoff.
    pub async fn requeue_task(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'pending' WHERE id = ?1 AND state = 'running'",
        )
        .bind(task_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `pending|running -> cancelled` for a single task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'cancelled', error_kind = 'cancelled',
                error_detail = 'batch cancelled', finished_at = ?2
            WHERE id = ?1 AND state IN ('pending', 'running')
            "#,
        )
        .bind(task_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sweep every remaining pending task of a cancelling batch.
    pub async fn cancel_pending_tasks(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'cancelled', error_kind = 'cancelled',
                error_detail = 'batch cancelled', finished_at = ?2
            WHERE batch_id = ?1 AND state = 'pending'
            "#,
        )
        .bind(batch_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Sweep tasks left `running` by a dead process when the batch is being
    /// cancelled without a live dispatcher owning them.
    pub async fn cancel_abandoned_running_tasks(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'cancelled', error_kind = 'cancelled',
                error_detail = 'batch cancelled', finished_at = ?2
            WHERE batch_id = ?1 AND state = 'running'
            "#,
        )
        .bind(batch_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Restart recovery: tasks left `running` by a dead process go back to
    /// `pending` for re-dispatch. Their attempt counter is preserved.
    pub async fn requeue_running_tasks(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'pending', started_at = NULL WHERE batch_id = ?1 AND state = 'running'",
        )
        .bind(batch_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(task_from_row).transpose()
    }

    /// All tasks of a batch ordered by source row, optionally filtered by state.
    pub async fn list_tasks(
        &self,
        batch_id: &str,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>> {
        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE batch_id = ?1 AND state = ?2 ORDER BY source_row_index"
                );
                sqlx::query(&sql)
                    .bind(batch_id)
                    .bind(state.to_string())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE batch_id = ?1 ORDER BY source_row_index"
                );
                sqlx::query(&sql).bind(batch_id).fetch_all(self.pool()).await?
            }
        };
        rows.into_iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: SqliteRow) -> Result<Task> {
    let state_raw: String = row.try_get("state")?;
    let state = state_raw
        .parse::<TaskState>()
        .map_err(|_| sqlx::Error::Decode(format!("invalid task state: {state_raw}").into()))?;

    let inputs: TaskInputs = serde_json::from_str(&row.try_get::<String, _>("inputs")?)?;

    let error_kind = row
        .try_get::<Option<String>, _>("error_kind")?
        .map(|raw| {
            raw.parse::<ErrorKind>()
                .map_err(|_| sqlx::Error::Decode(format!("invalid error kind: {raw}").into()))
        })
        .transpose()?;

    Ok(Task {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        source_row_index: row.try_get::<i64, _>("source_row_index")? as u32,
        inputs,
        state,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        external_run_id: row.try_get("external_run_id")?,
        output: row.try_get("output")?,
        error_kind,
        error_detail: row.try_get("error_detail")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        created_at: row.try_get("created_at")?,
    })
}
