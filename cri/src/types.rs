//! Closed enumerations and result shapes layered over the raw CRI messages.

use serde::{Deserialize, Serialize};

use crate::cri_api::{ContainerState, ContainerStatus, PodSandboxState};

/// Runtime view of a container, reduced to the states the agent acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl CriContainerState {
    /// Map the wire value; anything outside the known set is `Unknown`.
    pub fn from_proto(value: i32) -> Self {
        match ContainerState::try_from(value) {
            Ok(ContainerState::ContainerCreated) => CriContainerState::Created,
            Ok(ContainerState::ContainerRunning) => CriContainerState::Running,
            Ok(ContainerState::ContainerExited) => CriContainerState::Exited,
            Ok(ContainerState::ContainerUnknown) | Err(_) => CriContainerState::Unknown,
        }
    }

    pub fn to_proto(self) -> ContainerState {
        match self {
            CriContainerState::Created => ContainerState::ContainerCreated,
            CriContainerState::Running => ContainerState::ContainerRunning,
            CriContainerState::Exited => ContainerState::ContainerExited,
            CriContainerState::Unknown => ContainerState::ContainerUnknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriSandboxState {
    Ready,
    NotReady,
}

impl CriSandboxState {
    pub fn from_proto(value: i32) -> Self {
        match PodSandboxState::try_from(value) {
            Ok(PodSandboxState::SandboxReady) => CriSandboxState::Ready,
            _ => CriSandboxState::NotReady,
        }
    }

    pub fn to_proto(self) -> PodSandboxState {
        match self {
            CriSandboxState::Ready => PodSandboxState::SandboxReady,
            CriSandboxState::NotReady => PodSandboxState::SandboxNotready,
        }
    }
}

/// Container status as returned by `ContainerStatus`, with the state mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatusInfo {
    pub id: String,
    pub state: CriContainerState,
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
    pub started_at: i64,
    pub finished_at: i64,
}

impl From<ContainerStatus> for ContainerStatusInfo {
    fn from(status: ContainerStatus) -> Self {
        Self {
            state: CriContainerState::from_proto(status.state),
            id: status.id,
            exit_code: status.exit_code,
            reason: status.reason,
            message: status.message,
            started_at: status.started_at,
            finished_at: status.finished_at,
        }
    }
}

/// Result of the `run_containers` composite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContainersResponse {
    pub pod_id: String,
    pub container_ids: Vec<String>,
}
