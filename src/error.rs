//! Crate-level error types.

use thiserror::Error;

use crate::spreadsheet::RowValidationError;

/// Result type used across the batch execution core.
pub type Result<T> = std::result::Result<T, FlowBatchError>;

#[derive(Debug, Error)]
pub enum FlowBatchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("state transition error: {0}")]
    StateTransition(#[from] crate::state_machine::StateMachineError),

    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("remote client error: {0}")]
    Client(#[from] crate::client::ClientError),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] crate::spreadsheet::SheetError),

    #[error("{} row(s) failed validation", .0.len())]
    Validation(Vec<RowValidationError>),

    #[error("binding not found: {0}")]
    BindingNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("batch {batch_id} is in state '{state}', operation requires one of: {expected}")]
    InvalidBatchState {
        batch_id: String,
        state: String,
        expected: String,
    },

    #[error("batch execution aborted: {0}")]
    Execution(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
