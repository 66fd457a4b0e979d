//! Workflow binding registry.
//!
//! Stores workflow bindings and synchronizes their cached parameter schema
//! from the remote service. The cached schema is the authoritative
//! description used by row validation and result assembly downstream.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ClientError, WorkflowClient};
use crate::models::{ErrorKind, WorkflowBinding};
use crate::store::Store;
use crate::{FlowBatchError, Result};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("credentials rejected by remote service: {0}")]
    Auth(String),

    #[error("remote service unreachable: {0}")]
    Unreachable(String),

    #[error("malformed schema response: {0}")]
    Protocol(String),

    #[error("binding is referenced by {0} non-terminal batch(es)")]
    InUse(i64),
}

/// Fields accepted by `update`.
#[derive(Debug, Default, Clone)]
pub struct BindingUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub base_url: Option<String>,
    pub credential: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    store: Store,
    /// Deadline for schema-fetch calls.
    sync_timeout: Duration,
}

impl WorkflowRegistry {
    pub fn new(store: Store, sync_timeout: Duration) -> Self {
        Self {
            store,
            sync_timeout,
        }
    }

    /// Register a binding. The endpoint is validated by fetching the schema;
    /// a binding is never stored without a successful sync.
    pub async fn create(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        base_url: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<WorkflowBinding> {
        let mut binding = WorkflowBinding::new(name, description, base_url, credential);

        let schema = self.fetch_schema(&binding).await?;
        binding.schema = Some(schema);
        binding.synced_at = Some(Utc::now());

        self.store.insert_binding(&binding).await?;
        info!(binding_id = %binding.id, name = %binding.name, "binding registered");
        Ok(binding)
    }

    /// Refetch the schema and replace the cached copy.
    pub async fn sync(&self, id: &str) -> Result<WorkflowBinding> {
        let mut binding = self.get(id).await?;

        let schema = self.fetch_schema(&binding).await?;
        binding.schema = Some(schema);
        binding.synced_at = Some(Utc::now());

        self.store.update_binding(&binding).await?;
        info!(binding_id = %id, "binding schema synced");
        Ok(binding)
    }

    /// Apply field updates. The cached schema is only ever mutated by
    /// `sync`; callers changing `base_url` or `credential` should sync
    /// afterwards.
    pub async fn update(&self, id: &str, fields: BindingUpdate) -> Result<WorkflowBinding> {
        let mut binding = self.get(id).await?;

        if let Some(name) = fields.name {
            binding.name = name;
        }
        if let Some(description) = fields.description {
            binding.description = description;
        }
        if let Some(base_url) = fields.base_url {
            binding.base_url = crate::models::binding::normalize_base_url(base_url);
        }
        if let Some(credential) = fields.credential {
            binding.credential = credential;
        }
        if let Some(active) = fields.active {
            binding.active = active;
        }

        self.store.update_binding(&binding).await?;
        Ok(binding)
    }

    /// Delete a binding. Rejected while any non-terminal batch references it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let open = self.store.open_batch_count(id).await?;
        if open > 0 {
            warn!(binding_id = %id, open_batches = open, "delete rejected, binding in use");
            return Err(RegistryError::InUse(open).into());
        }
        if !self.store.delete_binding(id).await? {
            return Err(FlowBatchError::BindingNotFound(id.to_string()));
        }
        info!(binding_id = %id, "binding deleted");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowBinding> {
        self.store
            .get_binding(id)
            .await?
            .ok_or_else(|| FlowBatchError::BindingNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<WorkflowBinding>> {
        self.store.list_bindings().await
    }

    async fn fetch_schema(
        &self,
        binding: &WorkflowBinding,
    ) -> Result<crate::models::WorkflowSchema> {
        let client = WorkflowClient::new(binding, self.sync_timeout)
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;

        client.fetch_parameters().await.map_err(|e| {
            match &e {
                ClientError::Http { status, message } if *status == 401 || *status == 403 => {
                    RegistryError::Auth(message.clone())
                }
                ClientError::Protocol(detail) => RegistryError::Protocol(detail.clone()),
                // 4xx/5xx responses other than auth mean the endpoint is not
                // serving a workflow schema.
                ClientError::Http { .. } => {
                    if e.kind() == ErrorKind::Permanent {
                        RegistryError::Protocol(e.to_string())
                    } else {
                        RegistryError::Unreachable(e.to_string())
                    }
                }
                _ => RegistryError::Unreachable(e.to_string()),
            }
            .into()
        })
    }
}
