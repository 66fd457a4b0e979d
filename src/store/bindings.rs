//! Binding persistence.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;
use crate::models::{WorkflowBinding, WorkflowSchema};
use crate::Result;

impl Store {
    pub async fn insert_binding(&self, binding: &WorkflowBinding) -> Result<()> {
        let schema_json = binding
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO bindings
                (id, name, description, base_url, credential, schema, synced_at,
                 active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&binding.id)
        .bind(&binding.name)
        .bind(&binding.description)
        .bind(&binding.base_url)
        .bind(&binding.credential)
        .bind(schema_json)
        .bind(binding.synced_at)
        .bind(binding.active)
        .bind(binding.created_at)
        .bind(binding.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_binding(&self, binding: &WorkflowBinding) -> Result<()> {
        let schema_json = binding
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            UPDATE bindings
            SET name = ?2, description = ?3, base_url = ?4, credential = ?5,
                schema = ?6, synced_at = ?7, active = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&binding.id)
        .bind(&binding.name)
        .bind(&binding.description)
        .bind(&binding.base_url)
        .bind(&binding.credential)
        .bind(schema_json)
        .bind(binding.synced_at)
        .bind(binding.active)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_binding(&self, id: &str) -> Result<Option<WorkflowBinding>> {
        let row = sqlx::query("SELECT * FROM bindings WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(binding_from_row).transpose()
    }

    pub async fn list_bindings(&self) -> Result<Vec<WorkflowBinding>> {
        let rows = sqlx::query("SELECT * FROM bindings ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(binding_from_row).collect()
    }

    pub async fn delete_binding(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bindings WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of batches referencing this binding that are not yet terminal.
    pub async fn open_batch_count(&self, binding_id: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM batches
            WHERE binding_id = ?1 AND state NOT IN ('completed', 'failed')
            "#,
        )
        .bind(binding_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("n")?)
    }
}

fn binding_from_row(row: SqliteRow) -> Result<WorkflowBinding> {
    let schema = row
        .try_get::<Option<String>, _>("schema")?
        .map(|raw| serde_json::from_str::<WorkflowSchema>(&raw))
        .transpose()?;

    Ok(WorkflowBinding {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        base_url: row.try_get("base_url")?,
        credential: row.try_get("credential")?,
        schema,
        synced_at: row.try_get::<Option<DateTime<Utc>>, _>("synced_at")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
