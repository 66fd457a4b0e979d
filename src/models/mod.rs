//! Domain models persisted by the task-state store.

pub mod batch;
pub mod binding;
pub mod error_kind;
pub mod schema;
pub mod task;

pub use batch::{Batch, BatchCounts, BatchStatus};
pub use binding::WorkflowBinding;
pub use error_kind::ErrorKind;
pub use schema::{ParameterType, WorkflowParameter, WorkflowSchema};
pub use task::{Task, TaskInputs};
