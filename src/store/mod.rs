//! Durable task-state store.
//!
//! Single-process SQLite store holding the three collections `bindings`,
//! `batches` and `tasks`. Every state transition is a single atomic
//! statement, durable before the corresponding progress event is emitted.
//! The claim operation is an `UPDATE ... RETURNING` so two workers can never
//! claim the same row.

mod batches;
mod bindings;
mod tasks;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::Result;

/// Handle to the persistent store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (and create if missing) the store at `database_url`, e.g.
    /// `sqlite:flowbatch.db` or `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(Duration::from_secs(5));

        // A memory database exists per connection; the pool must not open a
        // second one.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(database_url = %database_url, "task-state store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bindings (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT,
                base_url    TEXT NOT NULL,
                credential  TEXT NOT NULL,
                schema      TEXT,
                synced_at   TEXT,
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id                TEXT PRIMARY KEY,
                binding_id        TEXT NOT NULL REFERENCES bindings (id),
                source_file_ref   TEXT NOT NULL,
                source_sheet      BLOB NOT NULL,
                state             TEXT NOT NULL,
                concurrency_limit INTEGER NOT NULL,
                max_attempts      INTEGER NOT NULL,
                result_template   TEXT,
                total             INTEGER NOT NULL,
                error_detail      TEXT,
                created_at        TEXT NOT NULL,
                started_at        TEXT,
                finished_at       TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id               TEXT PRIMARY KEY,
                batch_id         TEXT NOT NULL REFERENCES batches (id),
                source_row_index INTEGER NOT NULL,
                inputs           TEXT NOT NULL,
                state            TEXT NOT NULL,
                attempts         INTEGER NOT NULL DEFAULT 0,
                max_attempts     INTEGER NOT NULL,
                external_run_id  TEXT,
                output           TEXT,
                error_kind       TEXT,
                error_detail     TEXT,
                started_at       TEXT,
                finished_at      TEXT,
                created_at       TEXT NOT NULL,
                UNIQUE (batch_id, source_row_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_batch_state ON tasks (batch_id, state)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_batch_row ON tasks (batch_id, source_row_index)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
