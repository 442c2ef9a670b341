//! Container lifecycle state machine.
//!
//! Each action checks the container's recorded status, moves it to the
//! action's in-progress status, drives the pod instance, and records either
//! the resulting status or the action's failed status with the error text as
//! the reason.
//!
//! ```text
//! creating ─► created ─► starting ─► running ─► stopping ─► exited
//!     │                     │                      │
//!     ▼                     ▼                      ▼
//! create_failed        start_failed           stop_failed
//! ```
//!
//! Delete is allowed from every status. Sync and pull pass through a
//! transient status and land on what the runtime reports (sync) or the prior
//! status (pull).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use a3s_pod_core::container::{
    ContainerCreateInput, ContainerSpec, ContainerStatus, PullAuth, PullImageInput,
};
use a3s_pod_core::error::{PodError, Result, ResultExt};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::manager::PodManager;
use crate::pod::PodInstance;

/// Orchestration request on one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerAction {
    Create,
    Start,
    Stop,
    Delete,
    SyncStatus,
    PullImage,
}

impl ContainerAction {
    pub const ALL: [ContainerAction; 6] = [
        ContainerAction::Create,
        ContainerAction::Start,
        ContainerAction::Stop,
        ContainerAction::Delete,
        ContainerAction::SyncStatus,
        ContainerAction::PullImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Create => "create",
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Delete => "delete",
            ContainerAction::SyncStatus => "sync-status",
            ContainerAction::PullImage => "pull-image",
        }
    }

    /// Reject the action when the container's status does not allow it.
    pub fn check_transition(self, from: ContainerStatus) -> Result<()> {
        use ContainerStatus::*;
        let allowed = match self {
            ContainerAction::Create => matches!(from, Creating | CreateFailed),
            ContainerAction::Start => matches!(from, Created | Exited | StartFailed),
            ContainerAction::Stop => matches!(from, Running | StopFailed),
            ContainerAction::Delete | ContainerAction::SyncStatus | ContainerAction::PullImage => {
                true
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(PodError::InvalidState(format!(
                "can't {} a container in status {}",
                self, from
            )))
        }
    }

    pub fn in_progress_status(self) -> ContainerStatus {
        match self {
            ContainerAction::Create => ContainerStatus::Creating,
            ContainerAction::Start => ContainerStatus::Starting,
            ContainerAction::Stop => ContainerStatus::Stopping,
            ContainerAction::Delete => ContainerStatus::Deleting,
            ContainerAction::SyncStatus => ContainerStatus::SyncStatus,
            ContainerAction::PullImage => ContainerStatus::PullingImage,
        }
    }

    pub fn failed_status(self) -> ContainerStatus {
        match self {
            ContainerAction::Create => ContainerStatus::CreateFailed,
            ContainerAction::Start => ContainerStatus::StartFailed,
            ContainerAction::Stop => ContainerStatus::StopFailed,
            ContainerAction::Delete => ContainerStatus::DeleteFailed,
            ContainerAction::SyncStatus => ContainerStatus::SyncStatusFailed,
            ContainerAction::PullImage => ContainerStatus::PullImageFailed,
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        ContainerAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = ContainerAction::ALL.iter().map(|a| a.as_str()).collect();
                PodError::Validation(format!(
                    "unknown container action {}, choose from [{}]",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// Upstream record of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEntity {
    pub id: String,
    pub pod_id: String,
    pub name: String,
    pub index: u32,
    pub spec: ContainerSpec,
    pub status: ContainerStatus,
    /// Error text of the last failed transition
    #[serde(default)]
    pub reason: String,
}

impl ContainerEntity {
    pub fn create_input(&self) -> ContainerCreateInput {
        ContainerCreateInput {
            name: self.name.clone(),
            index: self.index,
            spec: self.spec.clone(),
        }
    }
}

/// Where container records and their statuses live.
#[async_trait]
pub trait ContainerRepository: Send + Sync {
    async fn get(&self, pod_id: &str, container_id: &str) -> Result<ContainerEntity>;

    /// Containers of a pod, ordered by index.
    async fn list_by_pod(&self, pod_id: &str) -> Result<Vec<ContainerEntity>>;

    async fn update_status(
        &self,
        pod_id: &str,
        container_id: &str,
        status: ContainerStatus,
        reason: &str,
    ) -> Result<()>;

    async fn purge(&self, pod_id: &str, container_id: &str) -> Result<()>;
}

/// Repository kept in process memory.
#[derive(Default)]
pub struct MemoryRepository {
    rows: RwLock<HashMap<(String, String), ContainerEntity>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: ContainerEntity) {
        self.rows
            .write()
            .insert((entity.pod_id.clone(), entity.id.clone()), entity);
    }

    fn key(pod_id: &str, container_id: &str) -> (String, String) {
        (pod_id.to_string(), container_id.to_string())
    }
}

#[async_trait]
impl ContainerRepository for MemoryRepository {
    async fn get(&self, pod_id: &str, container_id: &str) -> Result<ContainerEntity> {
        self.rows
            .read()
            .get(&Self::key(pod_id, container_id))
            .cloned()
            .ok_or_else(|| {
                PodError::NotFound(format!("container {} of pod {}", container_id, pod_id))
            })
    }

    async fn list_by_pod(&self, pod_id: &str) -> Result<Vec<ContainerEntity>> {
        let mut rows: Vec<_> = self
            .rows
            .read()
            .values()
            .filter(|e| e.pod_id == pod_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.index);
        Ok(rows)
    }

    async fn update_status(
        &self,
        pod_id: &str,
        container_id: &str,
        status: ContainerStatus,
        reason: &str,
    ) -> Result<()> {
        let mut rows = self.rows.write();
        let entity = rows
            .get_mut(&Self::key(pod_id, container_id))
            .ok_or_else(|| {
                PodError::NotFound(format!("container {} of pod {}", container_id, pod_id))
            })?;
        entity.status = status;
        entity.reason = reason.to_string();
        Ok(())
    }

    async fn purge(&self, pod_id: &str, container_id: &str) -> Result<()> {
        self.rows.write().remove(&Self::key(pod_id, container_id));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerReport {
    pub id: String,
    pub status: ContainerStatus,
}

/// Outcome of a pod-level create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePodReport {
    pub pod_id: String,
    pub sandbox_id: String,
    pub containers: Vec<ContainerReport>,
}

pub struct ContainerLifecycle {
    pods: Arc<PodManager>,
    repo: Arc<dyn ContainerRepository>,
}

impl ContainerLifecycle {
    pub fn new(pods: Arc<PodManager>, repo: Arc<dyn ContainerRepository>) -> Self {
        Self { pods, repo }
    }

    pub fn pods(&self) -> &Arc<PodManager> {
        &self.pods
    }

    /// Check the guard and record the in-progress status.
    async fn begin(
        &self,
        pod_id: &str,
        ctr_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerEntity> {
        let entity = self.repo.get(pod_id, ctr_id).await?;
        action.check_transition(entity.status)?;
        self.repo
            .update_status(pod_id, ctr_id, action.in_progress_status(), "")
            .await?;
        tracing::debug!(pod_id, container_id = ctr_id, action = %action, from = %entity.status, "Transition started");
        Ok(entity)
    }

    /// Record the failed status and hand the error back.
    async fn fail(
        &self,
        pod_id: &str,
        ctr_id: &str,
        action: ContainerAction,
        err: PodError,
    ) -> PodError {
        tracing::warn!(pod_id, container_id = ctr_id, action = %action, error = %err, "Transition failed");
        if let Err(e) = self
            .repo
            .update_status(pod_id, ctr_id, action.failed_status(), &err.to_string())
            .await
        {
            tracing::warn!(pod_id, container_id = ctr_id, error = %e, "Failed to record failure status");
        }
        err
    }

    async fn finish(&self, pod_id: &str, ctr_id: &str, status: ContainerStatus) -> Result<()> {
        self.repo.update_status(pod_id, ctr_id, status, "").await?;
        tracing::info!(pod_id, container_id = ctr_id, status = %status, "Container status updated");
        Ok(())
    }

    /// Create a container; chains into start when `auto_start` is set.
    pub async fn create(&self, pod_id: &str, ctr_id: &str) -> Result<ContainerStatus> {
        let auto_start = self.pods.deps().config.auto_start;
        self.create_then(pod_id, ctr_id, auto_start).await
    }

    async fn create_then(
        &self,
        pod_id: &str,
        ctr_id: &str,
        chain_start: bool,
    ) -> Result<ContainerStatus> {
        let pod = self.pods.get(pod_id)?;
        let entity = self.begin(pod_id, ctr_id, ContainerAction::Create).await?;

        if let Err(e) = pod.create_container(ctr_id, &entity.create_input()).await {
            return Err(self.fail(pod_id, ctr_id, ContainerAction::Create, e).await);
        }
        self.finish(pod_id, ctr_id, ContainerStatus::Created).await?;

        if chain_start {
            self.start_with(&pod, pod_id, ctr_id).await
        } else {
            Ok(ContainerStatus::Created)
        }
    }

    pub async fn start(&self, pod_id: &str, ctr_id: &str) -> Result<ContainerStatus> {
        let pod = self.pods.get(pod_id)?;
        self.start_with(&pod, pod_id, ctr_id).await
    }

    async fn start_with(
        &self,
        pod: &PodInstance,
        pod_id: &str,
        ctr_id: &str,
    ) -> Result<ContainerStatus> {
        let entity = self.begin(pod_id, ctr_id, ContainerAction::Start).await?;
        if let Err(e) = pod.start_container(ctr_id, &entity.create_input()).await {
            return Err(self.fail(pod_id, ctr_id, ContainerAction::Start, e).await);
        }
        self.finish(pod_id, ctr_id, ContainerStatus::Running).await?;
        Ok(ContainerStatus::Running)
    }

    /// Stop, then record whatever the runtime reports afterwards.
    pub async fn stop(
        &self,
        pod_id: &str,
        ctr_id: &str,
        timeout_secs: Option<i64>,
    ) -> Result<ContainerStatus> {
        let pod = self.pods.get(pod_id)?;
        self.begin(pod_id, ctr_id, ContainerAction::Stop).await?;

        let timeout = timeout_secs.unwrap_or(self.pods.deps().config.stop_timeout_secs);
        if let Err(e) = pod.stop_container(ctr_id, timeout).await {
            return Err(self.fail(pod_id, ctr_id, ContainerAction::Stop, e).await);
        }
        let status = match pod.sync_container_status(ctr_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pod_id, container_id = ctr_id, error = %e, "Status after stop unavailable, assuming exited");
                ContainerStatus::Exited
            }
        };
        self.finish(pod_id, ctr_id, status).await?;
        Ok(status)
    }

    /// Delete and purge the record. A record that is already gone is fine.
    pub async fn delete(&self, pod_id: &str, ctr_id: &str) -> Result<()> {
        let pod = self.pods.get(pod_id)?;
        let tracked = match self.begin(pod_id, ctr_id, ContainerAction::Delete).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        if let Err(e) = pod.delete_container(ctr_id).await {
            if tracked {
                return Err(self.fail(pod_id, ctr_id, ContainerAction::Delete, e).await);
            }
            return Err(e);
        }
        self.repo.purge(pod_id, ctr_id).await?;
        tracing::info!(pod_id, container_id = ctr_id, "Container purged");
        Ok(())
    }

    /// Record and return the runtime's view of the container.
    pub async fn sync_status(&self, pod_id: &str, ctr_id: &str) -> Result<ContainerStatus> {
        let pod = self.pods.get(pod_id)?;
        self.begin(pod_id, ctr_id, ContainerAction::SyncStatus)
            .await?;
        match pod.sync_container_status(ctr_id).await {
            Ok(status) => {
                self.finish(pod_id, ctr_id, status).await?;
                Ok(status)
            }
            Err(e) => Err(self.fail(pod_id, ctr_id, ContainerAction::SyncStatus, e).await),
        }
    }

    /// Pull the container's image, then return to the prior status.
    pub async fn pull_image(
        &self,
        pod_id: &str,
        ctr_id: &str,
        auth: Option<PullAuth>,
    ) -> Result<String> {
        let pod = self.pods.get(pod_id)?;
        let entity = self.begin(pod_id, ctr_id, ContainerAction::PullImage).await?;
        let input = PullImageInput {
            image: entity.spec.image.clone(),
            pull_policy: entity.spec.image_pull_policy,
            auth,
        };
        match pod.pull_image(&input).await {
            Ok(image_ref) => {
                self.repo
                    .update_status(pod_id, ctr_id, entity.status, &entity.reason)
                    .await?;
                Ok(image_ref)
            }
            Err(e) => Err(self.fail(pod_id, ctr_id, ContainerAction::PullImage, e).await),
        }
    }

    /// Start the pod sandbox (unless it already runs) and create and start
    /// every container concurrently.
    ///
    /// Completes only when every container is running. The first failed
    /// container, by index, is reported; containers that did come up are
    /// left running.
    pub async fn create_pod(&self, pod_id: &str) -> Result<CreatePodReport> {
        let pod = self.pods.get(pod_id)?;
        let sandbox_id = match pod.sandbox_id().await {
            Some(id) => id,
            None => {
                pod.start_pod()
                    .await
                    .with_context(|| format!("start pod {}", pod_id))?
                    .sandbox_id
            }
        };

        let entities = self.repo.list_by_pod(pod_id).await?;
        let results = futures::future::join_all(
            entities
                .iter()
                .map(|e| self.create_then(pod_id, &e.id, true)),
        )
        .await;

        let mut containers = Vec::with_capacity(entities.len());
        for (entity, result) in entities.iter().zip(results) {
            let status = result.map_err(|e| PodError::PartialFailure {
                step: format!("container {}", entity.id),
                source: Box::new(e),
            })?;
            if status != ContainerStatus::Running {
                return Err(PodError::PartialFailure {
                    step: format!("container {}", entity.id),
                    source: Box::new(PodError::InvalidState(format!(
                        "container {} ended {}",
                        entity.id, status
                    ))),
                });
            }
            containers.push(ContainerReport {
                id: entity.id.clone(),
                status,
            });
        }

        tracing::info!(pod_id, sandbox_id = %sandbox_id, containers = containers.len(), "Pod created");
        Ok(CreatePodReport {
            pod_id: pod_id.to_string(),
            sandbox_id,
            containers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{test_env, TestEnv};
    use a3s_pod_core::pod::PodDesc;
    use a3s_pod_core::ErrorKind;
    use a3s_pod_cri::CriContainerState;

    struct Harness {
        lifecycle: ContainerLifecycle,
        repo: Arc<MemoryRepository>,
        env: TestEnv,
        _dir: tempfile::TempDir,
    }

    fn entity(id: &str, index: u32, image: &str, status: ContainerStatus) -> ContainerEntity {
        ContainerEntity {
            id: id.to_string(),
            pod_id: "p1".to_string(),
            name: id.to_string(),
            index,
            spec: ContainerSpec {
                image: image.to_string(),
                ..Default::default()
            },
            status,
            reason: String::new(),
        }
    }

    async fn harness(started: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let env = test_env(dir.path());
        let pods = Arc::new(PodManager::new(env.deps.clone()));
        let pod = pods
            .create_pod(PodDesc {
                id: "p1".to_string(),
                name: "web".to_string(),
                ..Default::default()
            })
            .unwrap();
        if started {
            pod.start_pod().await.unwrap();
        }
        let repo = Arc::new(MemoryRepository::new());
        Harness {
            lifecycle: ContainerLifecycle::new(pods, repo.clone()),
            repo,
            env,
            _dir: dir,
        }
    }

    async fn status(h: &Harness, id: &str) -> (ContainerStatus, String) {
        let e = h.repo.get("p1", id).await.unwrap();
        (e.status, e.reason)
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(
            "sync-status".parse::<ContainerAction>().unwrap(),
            ContainerAction::SyncStatus
        );
        assert_eq!(
            "pull-image".parse::<ContainerAction>().unwrap(),
            ContainerAction::PullImage
        );
        let err = "restart".parse::<ContainerAction>().unwrap_err();
        assert!(err.to_string().contains("choose from [create, start, stop"));
    }

    #[test]
    fn test_transition_guards() {
        use ContainerAction::{Create, Delete, Start, Stop};
        use ContainerStatus::*;
        assert!(Start.check_transition(Exited).is_ok());
        assert!(Start.check_transition(StartFailed).is_ok());
        assert!(Start.check_transition(Created).is_ok());
        assert!(Start.check_transition(Running).is_err());
        assert!(Start.check_transition(Stopping).is_err());
        assert!(Stop.check_transition(Running).is_ok());
        assert!(Stop.check_transition(StopFailed).is_ok());
        assert!(Stop.check_transition(Exited).is_err());
        assert!(Create.check_transition(Running).is_err());
        for from in [Creating, Running, DeleteFailed, Unknown] {
            assert!(Delete.check_transition(from).is_ok());
            assert!(ContainerAction::SyncStatus.check_transition(from).is_ok());
        }
        assert_eq!(
            Start.check_transition(Running).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[tokio::test]
    async fn test_create_chains_into_running() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));

        let status = h.lifecycle.create("p1", "c1").await.unwrap();
        assert_eq!(status, ContainerStatus::Running);
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Running);
        assert_eq!(h.env.runtime.call_count("StartContainer"), 1);
    }

    async fn status_of(h: &Harness, id: &str) -> ContainerStatus {
        status(h, id).await.0
    }

    #[tokio::test]
    async fn test_create_failure_records_reason() {
        let h = harness(false).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));

        let err = h.lifecycle.create("p1", "c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let (st, reason) = status(&h, "c1").await;
        assert_eq!(st, ContainerStatus::CreateFailed);
        assert!(reason.contains("has no sandbox"));
    }

    #[tokio::test]
    async fn test_start_running_rejected_without_runtime_calls() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Running));
        h.env.runtime.clear_calls();

        let err = h.lifecycle.start("p1", "c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(h.env.runtime.calls().is_empty());
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Running);
    }

    #[tokio::test]
    async fn test_start_exited_recreates_once() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.lifecycle.create("p1", "c1").await.unwrap();
        let pod = h.lifecycle.pods().get("p1").unwrap();
        let cri_id = pod.list_containers().await[0].cri_id.clone();
        h.env.runtime.set_state(&cri_id, CriContainerState::Exited);
        h.repo
            .update_status("p1", "c1", ContainerStatus::Exited, "")
            .await
            .unwrap();
        h.env.runtime.clear_calls();

        assert_eq!(
            h.lifecycle.start("p1", "c1").await.unwrap(),
            ContainerStatus::Running
        );
        assert_eq!(h.env.runtime.call_count("RemoveContainer"), 1);
        assert_eq!(h.env.runtime.call_count("CreateContainer"), 1);
        assert_eq!(h.env.runtime.call_count("StartContainer"), 1);
        assert_ne!(pod.list_containers().await[0].cri_id, cri_id);
    }

    #[tokio::test]
    async fn test_stop_resyncs_from_runtime() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.lifecycle.create("p1", "c1").await.unwrap();

        let status = h.lifecycle.stop("p1", "c1", Some(0)).await.unwrap();
        assert_eq!(status, ContainerStatus::Exited);
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Exited);

        let err = h.lifecycle.stop("p1", "c1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_stop_failure_recorded() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.lifecycle.create("p1", "c1").await.unwrap();
        h.env.runtime.fail_on("StopContainer");

        assert!(h.lifecycle.stop("p1", "c1", None).await.is_err());
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::StopFailed);
    }

    #[tokio::test]
    async fn test_delete_purges_and_is_idempotent() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.lifecycle.create("p1", "c1").await.unwrap();

        h.lifecycle.delete("p1", "c1").await.unwrap();
        assert!(h.repo.get("p1", "c1").await.unwrap_err().is_not_found());
        h.lifecycle.delete("p1", "c1").await.unwrap();
        assert_eq!(h.env.runtime.call_count("RemoveContainer"), 1);
    }

    #[tokio::test]
    async fn test_sync_status() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.lifecycle.create("p1", "c1").await.unwrap();
        let pod = h.lifecycle.pods().get("p1").unwrap();
        let cri_id = pod.list_containers().await[0].cri_id.clone();
        h.env.runtime.set_state(&cri_id, CriContainerState::Unknown);

        assert_eq!(
            h.lifecycle.sync_status("p1", "c1").await.unwrap(),
            ContainerStatus::Unknown
        );
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Unknown);

        h.repo
            .insert(entity("c9", 1, "nginx", ContainerStatus::Created));
        assert!(h.lifecycle.sync_status("p1", "c9").await.is_err());
        assert_eq!(status_of(&h, "c9").await, ContainerStatus::SyncStatusFailed);
    }

    #[tokio::test]
    async fn test_pull_returns_to_prior_status() {
        let h = harness(true).await;
        h.repo
            .insert(entity("c1", 0, "redis:7", ContainerStatus::Exited));

        let image_ref = h.lifecycle.pull_image("p1", "c1", None).await.unwrap();
        assert_eq!(image_ref, "sha256:redis:7");
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Exited);

        h.env.runtime.fail_on("ImageStatus");
        assert!(h.lifecycle.pull_image("p1", "c1", None).await.is_err());
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::PullImageFailed);
    }

    #[tokio::test]
    async fn test_create_pod_runs_every_container() {
        let h = harness(false).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.repo
            .insert(entity("c2", 1, "redis", ContainerStatus::Creating));

        let report = h.lifecycle.create_pod("p1").await.unwrap();
        assert!(!report.sandbox_id.is_empty());
        assert_eq!(report.containers.len(), 2);
        assert!(report
            .containers
            .iter()
            .all(|c| c.status == ContainerStatus::Running));
        assert_eq!(h.env.runtime.call_count("RunPodSandbox"), 1);
    }

    #[tokio::test]
    async fn test_create_pod_names_failed_container() {
        let h = harness(false).await;
        h.repo
            .insert(entity("c1", 0, "nginx", ContainerStatus::Creating));
        h.repo.insert(entity("c2", 1, "", ContainerStatus::Creating));

        let err = h.lifecycle.create_pod("p1").await.unwrap_err();
        match &err {
            PodError::PartialFailure { step, .. } => assert_eq!(step, "container c2"),
            other => panic!("unexpected error: {other}"),
        }
        // No rollback of the container that came up.
        assert_eq!(status_of(&h, "c1").await, ContainerStatus::Running);
        assert_eq!(status_of(&h, "c2").await, ContainerStatus::CreateFailed);
    }

    #[tokio::test]
    async fn test_unknown_pod_is_not_found() {
        let h = harness(false).await;
        assert!(h
            .lifecycle
            .create("nope", "c1")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
