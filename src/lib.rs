//! # flowbatch
//!
//! Batch execution core for remote LLM workflow endpoints: a
//! bounded-concurrency dispatcher that invokes an idempotent HTTP workflow
//! endpoint for every input spreadsheet row, tolerates per-request failure,
//! supports pause/resume/cancel, persists progress durably across process
//! restart and keeps row/result pairing positionally correct.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod service;
pub mod spreadsheet;
pub mod state_machine;
pub mod store;

pub use config::FlowBatchConfig;
pub use error::{FlowBatchError, Result};
pub use service::{BatchOptions, BatchService};
