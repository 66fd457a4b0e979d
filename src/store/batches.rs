//! Batch persistence and aggregate counts.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;
use crate::models::{Batch, BatchCounts, Task};
use crate::state_machine::{BatchState, TaskState};
use crate::Result;

impl Store {
    /// Insert a batch, its source sheet bytes and all materialized tasks in
    /// one transaction, so a half-created batch can never be observed.
    pub async fn insert_batch_with_tasks(
        &self,
        batch: &Batch,
        source_sheet: &[u8],
        tasks: &[Task],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO batches
                (id, binding_id, source_file_ref, source_sheet, state,
                 concurrency_limit, max_attempts, result_template, total,
                 error_detail, created_at, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.binding_id)
        .bind(&batch.source_file_ref)
        .bind(source_sheet)
        .bind(batch.state.to_string())
        .bind(batch.concurrency_limit as i64)
        .bind(batch.max_attempts as i64)
        .bind(&batch.result_template)
        .bind(batch.total as i64)
        .bind(&batch.error_detail)
        .bind(batch.created_at)
        .bind(batch.started_at)
        .bind(batch.finished_at)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            let inputs_json = serde_json::to_string(&task.inputs)?;
            sqlx::query(
                r#"
                INSERT INTO tasks
                    (id, batch_id, source_row_index, inputs, state, attempts,
                     max_attempts, external_run_id, output, error_kind,
                     error_detail, started_at, finished_at, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )
            .bind(&task.id)
            .bind(&task.batch_id)
            .bind(task.source_row_index as i64)
            .bind(inputs_json)
            .bind(task.state.to_string())
            .bind(task.attempts as i64)
            .bind(task.max_attempts as i64)
            .bind(&task.external_run_id)
            .bind(&task.output)
            .bind(task.error_kind.map(|k| k.to_string()))
            .bind(&task.error_detail)
            .bind(task.started_at)
            .bind(task.finished_at)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_batch(&self, id: &str) -> Result<Option<Batch>> {
        let row = sqlx::query(
            r#"
            SELECT id, binding_id, source_file_ref, state, concurrency_limit,
                   max_attempts, result_template, total, error_detail,
                   created_at, started_at, finished_at
            FROM batches WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(batch_from_row).transpose()
    }

    pub async fn batch_state(&self, id: &str) -> Result<Option<BatchState>> {
        let row = sqlx::query("SELECT state FROM batches WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| parse_batch_state(&r)).transpose()
    }

    pub async fn update_batch_state(&self, id: &str, state: BatchState) -> Result<()> {
        sqlx::query("UPDATE batches SET state = ?2, error_detail = NULL WHERE id = ?1")
            .bind(id)
            .bind(state.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_batch_failed(&self, id: &str, detail: &str) -> Result<()> {
        sqlx::query(
            "UPDATE batches SET state = 'failed', error_detail = ?2, finished_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(detail)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stamp `started_at` once, on the first transition to running.
    pub async fn mark_batch_started(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE batches SET started_at = COALESCE(started_at, ?2) WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_batch_finished(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE batches SET finished_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Batches needing re-materialization after a process restart.
    pub async fn batches_needing_recovery(&self) -> Result<Vec<Batch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, binding_id, source_file_ref, state, concurrency_limit,
                   max_attempts, result_template, total, error_detail,
                   created_at, started_at, finished_at
            FROM batches WHERE state IN ('running', 'cancelling')
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(batch_from_row).collect()
    }

    /// Aggregate per-state task counts for a batch.
    pub async fn batch_counts(&self, id: &str) -> Result<BatchCounts> {
        let rows =
            sqlx::query("SELECT state, COUNT(*) AS n FROM tasks WHERE batch_id = ?1 GROUP BY state")
                .bind(id)
                .fetch_all(self.pool())
                .await?;

        let mut counts = BatchCounts::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            let n = n as u32;
            counts.total += n;
            match state.parse::<TaskState>() {
                Ok(TaskState::Pending) => counts.pending = n,
                Ok(TaskState::Running) => counts.running = n,
                Ok(TaskState::Succeeded) => counts.succeeded = n,
                Ok(TaskState::Failed) => counts.failed = n,
                Ok(TaskState::Cancelled) => counts.cancelled = n,
                Err(_) => {}
            }
        }
        Ok(counts)
    }

    /// Original workbook bytes for result assembly.
    pub async fn source_sheet(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT source_sheet FROM batches WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| r.try_get::<Vec<u8>, _>("source_sheet").map_err(Into::into))
            .transpose()
    }
}

fn parse_batch_state(row: &SqliteRow) -> Result<BatchState> {
    let raw: String = row.try_get("state")?;
    raw.parse()
        .map_err(|_| sqlx::Error::Decode(format!("invalid batch state: {raw}").into()).into())
}

fn batch_from_row(row: SqliteRow) -> Result<Batch> {
    let state = parse_batch_state(&row)?;
    Ok(Batch {
        id: row.try_get("id")?,
        binding_id: row.try_get("binding_id")?,
        source_file_ref: row.try_get("source_file_ref")?,
        state,
        concurrency_limit: row.try_get::<i64, _>("concurrency_limit")? as usize,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        result_template: row.try_get("result_template")?,
        total: row.try_get::<i64, _>("total")? as u32,
        error_detail: row.try_get("error_detail")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
    })
}
