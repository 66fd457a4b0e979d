//! Inbound operation facade.
//!
//! `BatchService` is the seam an admin/HTTP layer calls: binding CRUD,
//! batch creation from uploaded sheet bytes, lifecycle commands, task
//! listing and result download. The service owns the store, registry,
//! coordinator and event publisher.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::FlowBatchConfig;
use crate::events::{EventPublisher, ProgressEvent, PublishedEvent};
use crate::models::{Batch, BatchStatus, Task, WorkflowBinding};
use crate::orchestration::BatchCoordinator;
use crate::registry::{BindingUpdate, WorkflowRegistry};
use crate::spreadsheet::{assemble_results, parse_sheet, validate_rows};
use crate::state_machine::{BatchState, TaskState};
use crate::store::Store;
use crate::{FlowBatchError, Result};

/// Options accepted at batch creation; unset fields fall back to the
/// configured defaults.
#[derive(Debug, Default, Clone)]
pub struct BatchOptions {
    pub source_file_ref: Option<String>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub result_template: Option<String>,
}

#[derive(Clone)]
pub struct BatchService {
    store: Store,
    config: FlowBatchConfig,
    registry: WorkflowRegistry,
    coordinator: BatchCoordinator,
    publisher: EventPublisher,
}

impl BatchService {
    /// Connect the store at `config.database_url` and assemble the service.
    pub async fn new(config: FlowBatchConfig) -> Result<Self> {
        config.validate()?;
        let store = Store::connect(&config.database_url).await?;
        Ok(Self::with_store(store, config))
    }

    /// Assemble the service around an existing store connection.
    pub fn with_store(store: Store, config: FlowBatchConfig) -> Self {
        let publisher = EventPublisher::default();
        let registry = WorkflowRegistry::new(
            store.clone(),
            Duration::from_millis(config.batch.request_timeout_ms),
        );
        let coordinator = BatchCoordinator::new(store.clone(), config.clone(), publisher.clone());
        Self {
            store,
            config,
            registry,
            coordinator,
            publisher,
        }
    }

    // ----- bindings ------------------------------------------------------

    pub async fn create_binding(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        base_url: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<String> {
        let binding = self
            .registry
            .create(name, description, base_url, credential)
            .await?;
        Ok(binding.id)
    }

    pub async fn sync_binding(&self, binding_id: &str) -> Result<WorkflowBinding> {
        self.registry.sync(binding_id).await
    }

    pub async fn update_binding(
        &self,
        binding_id: &str,
        fields: BindingUpdate,
    ) -> Result<WorkflowBinding> {
        self.registry.update(binding_id, fields).await
    }

    pub async fn delete_binding(&self, binding_id: &str) -> Result<()> {
        self.registry.delete(binding_id).await
    }

    pub async fn get_binding(&self, binding_id: &str) -> Result<WorkflowBinding> {
        self.registry.get(binding_id).await
    }

    pub async fn list_bindings(&self) -> Result<Vec<WorkflowBinding>> {
        self.registry.list().await
    }

    // ----- batches -------------------------------------------------------

    /// Parse and validate the uploaded sheet, materialize one task per data
    /// row and store everything atomically. Validation failures reject the
    /// whole batch, listing row indices and field errors.
    pub async fn create_batch(
        &self,
        binding_id: &str,
        sheet_bytes: &[u8],
        options: BatchOptions,
    ) -> Result<String> {
        let binding = self.registry.get(binding_id).await?;
        let schema = binding.schema().ok_or_else(|| {
            FlowBatchError::Configuration(format!(
                "binding {binding_id} has no cached schema; sync it first"
            ))
        })?;

        let parsed = parse_sheet(sheet_bytes, schema)?;
        let errors = validate_rows(&parsed, schema);
        if !errors.is_empty() {
            return Err(FlowBatchError::Validation(errors));
        }

        let concurrency = self.config.effective_concurrency(options.concurrency);
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.batch.max_attempts)
            .max(1);

        let batch = Batch::new(
            binding_id,
            options.source_file_ref.unwrap_or_else(|| "upload.xlsx".to_string()),
            concurrency,
            max_attempts,
            options.result_template,
            parsed.rows.len() as u32,
        );
        let tasks: Vec<Task> = parsed
            .rows
            .iter()
            .map(|row| {
                Task::new(
                    &batch.id,
                    row.source_row_index,
                    row.inputs.clone(),
                    max_attempts,
                )
            })
            .collect();

        self.store
            .insert_batch_with_tasks(&batch, sheet_bytes, &tasks)
            .await?;

        self.publisher.publish(ProgressEvent::BatchStateChanged {
            batch_id: batch.id.clone(),
            from: None,
            to: BatchState::Created,
        });
        info!(
            batch_id = %batch.id,
            binding_id = %binding_id,
            tasks = tasks.len(),
            concurrency,
            "batch created"
        );
        Ok(batch.id)
    }

    pub async fn start_batch(&self, batch_id: &str) -> Result<()> {
        self.coordinator.start(batch_id).await
    }

    pub async fn pause_batch(&self, batch_id: &str) -> Result<()> {
        self.coordinator.pause(batch_id).await
    }

    pub async fn resume_batch(&self, batch_id: &str) -> Result<()> {
        self.coordinator.resume(batch_id).await
    }

    pub async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        self.coordinator.cancel(batch_id).await
    }

    /// Re-materialize interrupted batches after a process restart.
    pub async fn recover(&self) -> Result<usize> {
        self.coordinator.recover().await
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchStatus> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| FlowBatchError::BatchNotFound(batch_id.to_string()))?;
        let counts = self.store.batch_counts(batch_id).await?;
        Ok(BatchStatus {
            id: batch.id,
            binding_id: batch.binding_id,
            state: batch.state,
            counts,
            created_at: batch.created_at,
            started_at: batch.started_at,
            finished_at: batch.finished_at,
        })
    }

    pub async fn list_tasks(
        &self,
        batch_id: &str,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>> {
        self.store.list_tasks(batch_id, state).await
    }

    /// Assemble the output workbook. Valid once the batch is `completed`.
    pub async fn download_result(&self, batch_id: &str) -> Result<Vec<u8>> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| FlowBatchError::BatchNotFound(batch_id.to_string()))?;
        if batch.state != BatchState::Completed {
            return Err(FlowBatchError::InvalidBatchState {
                batch_id: batch_id.to_string(),
                state: batch.state.to_string(),
                expected: "completed".to_string(),
            });
        }

        let original = self
            .store
            .source_sheet(batch_id)
            .await?
            .ok_or_else(|| FlowBatchError::BatchNotFound(batch_id.to_string()))?;
        let tasks = self.store.list_tasks(batch_id, None).await?;
        let results: Vec<(u32, String)> = tasks
            .iter()
            .filter_map(|task| {
                task.result_cell_text()
                    .map(|text| (task.source_row_index, text))
            })
            .collect();

        Ok(assemble_results(&original, &results)?)
    }

    // ----- observation ---------------------------------------------------

    /// Subscribe to the progress event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
