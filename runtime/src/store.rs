//! JSON files in the pod home.
//!
//! Every write goes to `<name>.json.tmp` first and is renamed over the target,
//! so a crash mid-write never leaves a truncated file behind.

use std::path::Path;

use a3s_pod_core::error::{PodError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize `value` to `path` atomically, creating the parent directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PodError::Other(format!(
                "failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let json = serde_json::to_string_pretty(value)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json).map_err(|e| {
        PodError::Other(format!(
            "failed to write tmp file {}: {}",
            tmp_path.display(),
            e
        ))
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        PodError::Other(format!(
            "failed to rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Read a JSON file; `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path).map_err(|e| {
        PodError::Other(format!("failed to read {}: {}", path.display(), e))
    })?;
    let value = serde_json::from_str(&data).map_err(|e| {
        PodError::Serialization(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(value))
}
