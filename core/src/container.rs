//! Container model: create input, devices, volume mounts and status.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PodError, Result};

/// Image pull policy. Unset deserializes to `IfNotPresent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    #[default]
    IfNotPresent,
}

impl FromStr for ImagePullPolicy {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "IfNotPresent" => Ok(ImagePullPolicy::IfNotPresent),
            "Always" => Ok(ImagePullPolicy::Always),
            other => Err(PodError::Validation(format!(
                "invalid image_pull_policy {}, choose from [Always, IfNotPresent]",
                other
            ))),
        }
    }
}

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePullPolicy::Always => write!(f, "Always"),
            ImagePullPolicy::IfNotPresent => write!(f, "IfNotPresent"),
        }
    }
}

/// Registry credentials, forwarded to the runtime untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullAuth {
    pub username: String,
    pub password: String,
    pub auth: String,
    pub server_address: String,
    pub identity_token: String,
    pub registry_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Device request of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerDevice {
    /// Raw host device node passed through as-is
    Host {
        host_path: String,
        container_path: String,
        permissions: String,
    },
    /// Pod-managed device expanded by its type's device manager
    Isolated {
        id: String,
        #[serde(default)]
        container_path: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountPropagation {
    #[default]
    Private,
    HostToContainer,
    Bidirectional,
}

/// Backing kind of a volume mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMountKind {
    /// Disk-backed volume; `raw` exposes the disk as a block device instead
    /// of mounting its filesystem
    Disk {
        #[serde(default)]
        raw: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeMount {
    /// Name of the pod volume
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
    pub propagation: MountPropagation,
    pub kind: Option<VolumeMountKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub image: String,
    pub image_pull_policy: ImagePullPolicy,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: String,
    pub envs: Vec<KeyValue>,
    pub devices: Vec<ContainerDevice>,
    pub volume_mounts: Vec<VolumeMount>,
    pub privileged: bool,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Everything needed to (re)create one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerCreateInput {
    pub name: String,
    /// Ordinal index within the pod
    pub index: u32,
    pub spec: ContainerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullImageInput {
    pub image: String,
    pub pull_policy: ImagePullPolicy,
    pub auth: Option<PullAuth>,
}

impl PullImageInput {
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(PodError::Validation("image is empty".to_string()));
        }
        Ok(())
    }
}

/// Orchestration-level container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Creating,
    CreateFailed,
    Created,
    Starting,
    StartFailed,
    Running,
    Stopping,
    StopFailed,
    Exited,
    SyncStatus,
    SyncStatusFailed,
    PullingImage,
    PullImageFailed,
    Deleting,
    DeleteFailed,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::CreateFailed => "create_failed",
            ContainerStatus::Created => "created",
            ContainerStatus::Starting => "starting",
            ContainerStatus::StartFailed => "start_failed",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopping => "stopping",
            ContainerStatus::StopFailed => "stop_failed",
            ContainerStatus::Exited => "exited",
            ContainerStatus::SyncStatus => "sync_status",
            ContainerStatus::SyncStatusFailed => "sync_status_failed",
            ContainerStatus::PullingImage => "pulling_image",
            ContainerStatus::PullImageFailed => "pull_image_failed",
            ContainerStatus::Deleting => "deleting",
            ContainerStatus::DeleteFailed => "delete_failed",
            ContainerStatus::Unknown => "unknown",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ContainerStatus::CreateFailed
                | ContainerStatus::StartFailed
                | ContainerStatus::StopFailed
                | ContainerStatus::SyncStatusFailed
                | ContainerStatus::PullImageFailed
                | ContainerStatus::DeleteFailed
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
