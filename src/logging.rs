//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and,
//! when a log directory is configured, to a JSON log file for debugging
//! long-running batch executions.

use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let file_layer = log_directory().map(|log_dir| {
            let filename = format!("{}.{}.log", environment, process::id());
            let file_appender = tracing_appender::rolling::never(&log_dir, filename);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The guard must live as long as the process for the writer to flush.
            std::mem::forget(guard);
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        // A global subscriber may already be installed by the embedding
        // application; that is not an error.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn log_directory() -> Option<PathBuf> {
    let dir = std::env::var("FLOWBATCH_LOG_DIR").ok()?;
    let path = PathBuf::from(dir);
    std::fs::create_dir_all(&path).ok()?;
    Some(path)
}

/// Get current environment from environment variables.
fn get_environment() -> String {
    std::env::var("FLOWBATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment, overridable via `FLOWBATCH_LOG`.
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("FLOWBATCH_LOG") {
        return level;
    }
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        std::env::remove_var("FLOWBATCH_LOG");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("unknown"), "debug");
    }
}
