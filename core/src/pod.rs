//! Pod descriptor: the declared shape of one sandbox and its host resources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{PodError, Result};

/// Metadata key holding the CRI sandbox id.
pub const META_CRI_ID: &str = "cri_id";

/// Metadata key holding the JSON snapshot of the CRI sandbox config.
pub const META_CRI_CONFIG: &str = "cri_config";

/// Declared port mapping. `protocol` is one of `tcp`, `udp`, `sctp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMapping {
    pub protocol: String,
    pub container_port: i32,
    pub host_port: i32,
    pub host_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// A disk image attached to the pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodDisk {
    pub id: String,
    pub name: String,
    /// Host path of the backing image file
    pub path: PathBuf,
    /// Image format (`raw`, `qcow2`, ...)
    pub format: String,
    /// Filesystem inside the image, if it carries one
    pub fs: Option<String>,
}

/// Disk reference of a volume: either an id (or name) or a position in the
/// pod's disk list. Index references are rewritten to ids by
/// [`normalize_volume_disks`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeDisk {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
}

/// Backing of a pod volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    Disk(VolumeDisk),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodVolume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// A managed device owned by the pod, handed to containers by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatedDevice {
    pub id: String,
    #[serde(rename = "type")]
    pub dev_type: String,
    /// Host path of the device or its backing file
    pub path: String,
    /// Device address (PCI address, control node, ...)
    pub addr: String,
}

/// Runtime descriptor of a pod, persisted as `desc.json` in the pod home.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodDesc {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub port_mappings: Vec<PortMapping>,
    pub dns: Option<DnsConfig>,
    pub volumes: Vec<PodVolume>,
    pub disks: Vec<PodDisk>,
    pub isolated_devices: Vec<IsolatedDevice>,
    pub metadata: HashMap<String, String>,
}

impl PodDesc {
    /// CRI sandbox id, once the sandbox has been created.
    pub fn cri_id(&self) -> Option<&str> {
        self.metadata
            .get(META_CRI_ID)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Serialized sandbox config snapshot, if recorded.
    pub fn cri_config(&self) -> Option<&str> {
        self.metadata
            .get(META_CRI_CONFIG)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    pub fn set_cri_info(&mut self, sandbox_id: &str, config_json: &str) {
        self.metadata
            .insert(META_CRI_ID.to_string(), sandbox_id.to_string());
        self.metadata
            .insert(META_CRI_CONFIG.to_string(), config_json.to_string());
    }

    pub fn clear_cri_info(&mut self) {
        self.metadata.remove(META_CRI_ID);
        self.metadata.remove(META_CRI_CONFIG);
    }

    /// Find a disk by id, falling back to its name.
    pub fn find_disk(&self, id_or_name: &str) -> Option<&PodDisk> {
        self.disks
            .iter()
            .find(|d| d.id == id_or_name)
            .or_else(|| self.disks.iter().find(|d| d.name == id_or_name))
    }

    pub fn find_volume(&self, name: &str) -> Option<&PodVolume> {
        self.volumes.iter().find(|v| v.name == name)
    }

    pub fn find_isolated_device(&self, id: &str) -> Option<&IsolatedDevice> {
        self.isolated_devices.iter().find(|d| d.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PodError::Validation("pod id is empty".to_string()));
        }
        if self.name.is_empty() {
            return Err(PodError::Validation(format!("pod {} has no name", self.id)));
        }
        let mut names = std::collections::HashSet::new();
        for volume in &self.volumes {
            if volume.name.is_empty() {
                return Err(PodError::Validation("volume name is empty".to_string()));
            }
            if !names.insert(volume.name.as_str()) {
                return Err(PodError::Validation(format!(
                    "duplicate volume name {}",
                    volume.name
                )));
            }
        }
        Ok(())
    }
}

/// Check a disk index against the pod's disk list.
pub fn check_disk_index(index: i32, disk_count: usize) -> Result<usize> {
    if index < 0 {
        return Err(PodError::Validation(format!(
            "disk.index {} is less than 0",
            index
        )));
    }
    let idx = index as usize;
    if idx >= disk_count {
        return Err(PodError::Validation(format!(
            "disk.index {} is larger than disk size {}",
            index, disk_count
        )));
    }
    Ok(idx)
}

/// Rewrite index-based volume disk references to disk ids and clear the index.
///
/// Name references are rewritten to the id too. Runs at validation time; the
/// rewrite is never reversed.
pub fn normalize_volume_disks(disks: &[PodDisk], volumes: &mut [PodVolume]) -> Result<()> {
    for volume in volumes.iter_mut() {
        let VolumeSource::Disk(disk) = &mut volume.source;
        if let Some(index) = disk.index.take() {
            let idx = check_disk_index(index, disks.len())?;
            disk.id = disks[idx].id.clone();
            continue;
        }
        if disk.id.is_empty() {
            return Err(PodError::Validation(format!(
                "volume {}: one of disk.id or disk.index must be set",
                volume.name
            )));
        }
        let found = disks
            .iter()
            .find(|d| d.id == disk.id || d.name == disk.id)
            .ok_or_else(|| PodError::NotFound(format!("disk {}", disk.id)))?;
        disk.id = found.id.clone();
    }
    Ok(())
}
