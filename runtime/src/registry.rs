//! Local container registry.
//!
//! Maps logical container ids to the CRI ids the runtime assigned, persisted
//! as `containers.json` in the pod home. The file is rewritten after every
//! insert or remove.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_pod_core::error::{PodError, Result};
use serde::{Deserialize, Serialize};

use crate::store::{read_json, write_json_atomic};

/// Registry file name inside the pod home.
pub const REGISTRY_FILE: &str = "containers.json";

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Logical id
    pub id: String,
    pub index: u32,
    pub cri_id: String,
}

#[derive(Debug)]
pub struct ContainerRegistry {
    path: PathBuf,
    records: HashMap<String, ContainerRecord>,
}

impl ContainerRegistry {
    /// Empty registry backed by `path`; nothing is written until the first
    /// mutation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: HashMap::new(),
        }
    }

    /// Load the registry from `path`, empty when the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_json(&path)?.unwrap_or_default();
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&ContainerRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records ordered by index.
    pub fn list(&self) -> Vec<ContainerRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record and persist. An id already present is rejected. The
    /// in-memory map only changes once the file is written.
    pub fn insert(&mut self, record: ContainerRecord) -> Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(PodError::Validation(format!(
                "container {} already exists",
                record.id
            )));
        }
        let mut records = self.records.clone();
        records.insert(record.id.clone(), record);
        write_json_atomic(&self.path, &records)?;
        self.records = records;
        Ok(())
    }

    /// Drop a record and persist, whether or not it was present.
    pub fn remove(&mut self, id: &str) -> Result<Option<ContainerRecord>> {
        let mut records = self.records.clone();
        let removed = records.remove(id);
        write_json_atomic(&self.path, &records)?;
        self.records = records;
        Ok(removed)
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records)
    }
}
