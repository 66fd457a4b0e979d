//! Configuration for the batch execution core.
//!
//! Environment-aware YAML loading in the shape `config/flowbatch.yaml`
//! (base) plus `config/flowbatch.{environment}.yaml` (overlay). All knobs
//! have defaults so embedding code and tests can run without any file.

mod loader;

pub use loader::load_config;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowBatchConfig {
    /// Connection string for the task-state store.
    pub database_url: String,
    /// Hard ceiling on concurrently running tasks across all batches.
    pub max_concurrent_tasks: usize,
    /// Minimum interval between `batch_progress` events, in milliseconds.
    pub progress_tick_ms: u64,
    /// Per-batch defaults, overridable at batch creation.
    pub batch: BatchDefaults,
    /// Retry/backoff policy applied to retryable task failures.
    pub retry: RetryConfig,
}

/// Per-batch execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchDefaults {
    /// Number of dispatcher workers per batch.
    pub concurrency_limit: usize,
    /// Maximum remote-call attempts per task.
    pub max_attempts: u32,
    /// Per-call deadline covering connect, headers and body, in milliseconds.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff delay, in milliseconds.
    pub base_delay_ms: u64,
    /// Exponential growth factor between attempts.
    pub multiplier: f64,
    /// Backoff ceiling, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for FlowBatchConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:flowbatch.db".to_string(),
            max_concurrent_tasks: 100,
            progress_tick_ms: 1_000,
            batch: BatchDefaults::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            max_attempts: 3,
            request_timeout_ms: 300_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl FlowBatchConfig {
    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    /// Clamp a requested per-batch concurrency to the process-wide ceiling.
    pub fn effective_concurrency(&self, requested: Option<usize>) -> usize {
        let requested = requested.unwrap_or(self.batch.concurrency_limit);
        requested.clamp(1, self.max_concurrent_tasks)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.batch.concurrency_limit == 0 {
            return Err(crate::FlowBatchError::Configuration(
                "batch.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.batch.max_attempts == 0 {
            return Err(crate::FlowBatchError::Configuration(
                "batch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(crate::FlowBatchError::Configuration(
                "retry.multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
