//! Environment-aware configuration loading.
//!
//! Discovers `flowbatch.yaml` in the given directory, deep-merges the
//! environment overlay `flowbatch.{environment}.yaml` on top when present,
//! and deserializes the merged document.

use std::path::Path;

use serde_yaml::Value as YamlValue;
use tracing::{debug, info};

use super::FlowBatchConfig;
use crate::{FlowBatchError, Result};

/// Load configuration from `config_dir`, falling back to defaults when the
/// base file does not exist.
pub fn load_config(config_dir: &Path) -> Result<FlowBatchConfig> {
    let environment = detect_environment();
    let base_path = config_dir.join("flowbatch.yaml");
    let overlay_path = config_dir.join(format!("flowbatch.{environment}.yaml"));

    if !base_path.exists() {
        debug!(
            path = %base_path.display(),
            "no configuration file found, using defaults"
        );
        return Ok(FlowBatchConfig::default());
    }

    let mut merged = read_yaml(&base_path)?;
    if overlay_path.exists() {
        let overlay = read_yaml(&overlay_path)?;
        merge_yaml(&mut merged, overlay);
        debug!(overlay = %overlay_path.display(), "applied environment overlay");
    }

    let config: FlowBatchConfig = serde_yaml::from_value(merged)
        .map_err(|e| FlowBatchError::Configuration(format!("invalid configuration: {e}")))?;
    config.validate()?;

    info!(
        environment = %environment,
        max_concurrent_tasks = config.max_concurrent_tasks,
        "configuration loaded"
    );
    Ok(config)
}

fn detect_environment() -> String {
    std::env::var("FLOWBATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn read_yaml(path: &Path) -> Result<YamlValue> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        FlowBatchError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        FlowBatchError::Configuration(format!("cannot parse {}: {e}", path.display()))
    })
}

/// Recursively merge `overlay` into `base`. Mappings merge key-wise, every
/// other value type is replaced.
fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
    match (base, overlay) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}
