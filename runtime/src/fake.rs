//! Recording in-memory stand-ins for the host, the CRI runtime, the control
//! plane and the task reporter.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use a3s_pod_core::error::{PodError, Result};
use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::{
    AuthConfig, Container, ContainerConfig, ContainerMetadata, Image, ImageFilter, ImageSpec,
    PodSandbox, PodSandboxConfig, VersionResponse,
};
use a3s_pod_cri::{
    ContainerStatusInfo, CriContainerState, CriSandboxState, ListContainerOptions,
    ListPodOptions, RuntimeClient,
};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::control::ControlPlane;
use crate::device::DeviceManagerRegistry;
use crate::host::{HostOps, LoopDevice};
use crate::loopdev::LoopAllocator;
use crate::pod::PodDeps;
use crate::task::TaskReporter;

// ============================================================================
// Host
// ============================================================================

#[derive(Default)]
pub struct FakeHost {
    next_loop: AtomicUsize,
    attached: Mutex<Vec<PathBuf>>,
    live: Mutex<Vec<LoopDevice>>,
    detached: Mutex<Vec<String>>,
    mounts: Mutex<Vec<(String, PathBuf, String)>>,
    mounted: Mutex<HashSet<PathBuf>>,
    unmounted: Mutex<Vec<PathBuf>>,
    binders: Mutex<Vec<String>>,
    existing: Mutex<HashSet<PathBuf>>,
}

impl FakeHost {
    pub fn attach_count(&self) -> usize {
        self.attached.lock().len()
    }

    /// Loop devices attached and not yet detached.
    pub fn live_loops(&self) -> Vec<LoopDevice> {
        self.live.lock().clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().clone()
    }

    /// (device, target, fstype) of every mount call.
    pub fn mounts(&self) -> Vec<(String, PathBuf, String)> {
        self.mounts.lock().clone()
    }

    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.unmounted.lock().clone()
    }

    pub fn binders_created(&self) -> Vec<String> {
        self.binders.lock().clone()
    }

    pub fn add_existing(&self, path: &str) {
        self.existing.lock().insert(PathBuf::from(path));
    }

    pub fn add_mounted(&self, target: &Path) {
        self.mounted.lock().insert(target.to_path_buf());
    }
}

#[async_trait]
impl HostOps for FakeHost {
    async fn attach_loop(&self, backing_file: &Path) -> Result<String> {
        let n = self.next_loop.fetch_add(1, Ordering::SeqCst);
        let device = format!("/dev/loop{}", n);
        self.attached.lock().push(backing_file.to_path_buf());
        self.live.lock().push(LoopDevice {
            device: device.clone(),
            backing_file: backing_file.to_path_buf(),
        });
        Ok(device)
    }

    async fn detach_loop(&self, device: &str) -> Result<()> {
        self.live.lock().retain(|l| l.device != device);
        self.detached.lock().push(device.to_string());
        Ok(())
    }

    async fn list_loops(&self) -> Result<Vec<LoopDevice>> {
        Ok(self.live.lock().clone())
    }

    async fn mount(&self, device: &str, target: &Path, fstype: &str) -> Result<()> {
        self.mounts
            .lock()
            .push((device.to_string(), target.to_path_buf(), fstype.to_string()));
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        self.mounted.lock().remove(target);
        self.unmounted.lock().push(target.to_path_buf());
        Ok(())
    }

    async fn create_binder_device(&self, _helper: &Path, _control: &Path, name: &str) -> Result<()> {
        self.binders.lock().push(name.to_string());
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing.lock().contains(path)
    }

    fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().contains(target)
    }
}

/// Default device managers over a throwaway fake host.
pub fn test_registry() -> DeviceManagerRegistry {
    let host = Arc::new(FakeHost::default());
    let loops = Arc::new(LoopAllocator::new(host.clone()));
    DeviceManagerRegistry::with_defaults(&AgentConfig::default(), host, loops)
}

// ============================================================================
// CRI runtime
// ============================================================================

struct FakeSandbox {
    config: PodSandboxConfig,
    ready: bool,
}

struct FakeContainer {
    sandbox_id: String,
    config: ContainerConfig,
    state: CriContainerState,
}

/// In-memory runtime that records every call by its CRI method name.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    sandboxes: Mutex<HashMap<String, FakeSandbox>>,
    containers: Mutex<HashMap<String, FakeContainer>>,
    images: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl FakeRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every later call of `op` fail with a transport error.
    pub fn fail_on(&self, op: &str) {
        self.failing.lock().insert(op.to_string());
    }

    pub fn add_image(&self, image: &str) {
        self.images.lock().insert(image.to_string());
    }

    pub fn set_state(&self, container_id: &str, state: CriContainerState) {
        if let Some(ctr) = self.containers.lock().get_mut(container_id) {
            ctr.state = state;
        }
    }

    pub fn sandbox_config(&self, sandbox_id: &str) -> Option<PodSandboxConfig> {
        self.sandboxes
            .lock()
            .get(sandbox_id)
            .map(|sb| sb.config.clone())
    }

    pub fn container_config(&self, container_id: &str) -> Option<ContainerConfig> {
        self.containers
            .lock()
            .get(container_id)
            .map(|c| c.config.clone())
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().len()
    }

    fn record(&self, op: &str) -> Result<()> {
        self.calls.lock().push(op.to_string());
        if self.failing.lock().contains(op) {
            return Err(PodError::Timeout(format!("{} injected failure", op)));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn image_id(image: &str) -> String {
        format!("sha256:{}", image)
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn version(&self) -> Result<VersionResponse> {
        self.record("Version")?;
        Ok(VersionResponse {
            version: "0.1.0".to_string(),
            runtime_name: "fake".to_string(),
            runtime_version: "1.0".to_string(),
            runtime_api_version: "v1".to_string(),
        })
    }

    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        _runtime_handler: &str,
    ) -> Result<String> {
        self.record("RunPodSandbox")?;
        let id = self.next_id("sb");
        self.sandboxes.lock().insert(
            id.clone(),
            FakeSandbox {
                config: config.clone(),
                ready: true,
            },
        );
        Ok(id)
    }

    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.record("StopPodSandbox")?;
        match self.sandboxes.lock().get_mut(sandbox_id) {
            Some(sb) => {
                sb.ready = false;
                Ok(())
            }
            None => Err(PodError::NotFound(format!("sandbox {}", sandbox_id))),
        }
    }

    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.record("RemovePodSandbox")?;
        if self.sandboxes.lock().remove(sandbox_id).is_none() {
            return Err(PodError::NotFound(format!("sandbox {}", sandbox_id)));
        }
        self.containers
            .lock()
            .retain(|_, c| c.sandbox_id != sandbox_id);
        Ok(())
    }

    async fn list_pods(&self, opts: &ListPodOptions) -> Result<Vec<PodSandbox>> {
        self.record("ListPodSandbox")?;
        let items = self
            .sandboxes
            .lock()
            .iter()
            .filter(|(id, _)| opts.id.is_empty() || opts.id == **id)
            .filter(|(_, sb)| match opts.state {
                Some(CriSandboxState::Ready) => sb.ready,
                Some(CriSandboxState::NotReady) => !sb.ready,
                None => true,
            })
            .map(|(id, sb)| PodSandbox {
                id: id.clone(),
                metadata: sb.config.metadata.clone(),
                state: if sb.ready {
                    CriSandboxState::Ready.to_proto() as i32
                } else {
                    CriSandboxState::NotReady.to_proto() as i32
                },
                ..Default::default()
            })
            .collect();
        opts.filter(items)
    }

    async fn create_container(
        &self,
        sandbox_id: &str,
        _sandbox_config: &PodSandboxConfig,
        config: &ContainerConfig,
        with_pull: bool,
    ) -> Result<String> {
        if with_pull {
            let image = config.image.clone().unwrap_or_default().image;
            self.pull_image(&image, None, None, HashMap::new()).await?;
        }
        self.record("CreateContainer")?;
        if !self.sandboxes.lock().contains_key(sandbox_id) {
            return Err(PodError::NotFound(format!("sandbox {}", sandbox_id)));
        }
        let id = self.next_id("ctr");
        self.containers.lock().insert(
            id.clone(),
            FakeContainer {
                sandbox_id: sandbox_id.to_string(),
                config: config.clone(),
                state: CriContainerState::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.record("StartContainer")?;
        match self.containers.lock().get_mut(container_id) {
            Some(ctr) => {
                ctr.state = CriContainerState::Running;
                Ok(())
            }
            None => Err(PodError::NotFound(format!("container {}", container_id))),
        }
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: i64) -> Result<()> {
        self.record("StopContainer")?;
        match self.containers.lock().get_mut(container_id) {
            Some(ctr) => {
                ctr.state = CriContainerState::Exited;
                Ok(())
            }
            None => Err(PodError::NotFound(format!("container {}", container_id))),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.record("RemoveContainer")?;
        match self.containers.lock().remove(container_id) {
            Some(_) => Ok(()),
            None => Err(PodError::NotFound(format!("container {}", container_id))),
        }
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatusInfo> {
        self.record("ContainerStatus")?;
        let containers = self.containers.lock();
        let ctr = containers
            .get(container_id)
            .ok_or_else(|| PodError::NotFound(format!("container {}", container_id)))?;
        Ok(ContainerStatusInfo {
            id: container_id.to_string(),
            state: ctr.state,
            exit_code: 0,
            reason: String::new(),
            message: String::new(),
            started_at: 0,
            finished_at: 0,
        })
    }

    async fn list_containers(&self, opts: &ListContainerOptions) -> Result<Vec<Container>> {
        self.record("ListContainers")?;
        let items = self
            .containers
            .lock()
            .iter()
            .filter(|(id, _)| opts.id.is_empty() || opts.id == **id)
            .filter(|(_, c)| opts.pod_id.is_empty() || opts.pod_id == c.sandbox_id)
            .map(|(id, c)| Container {
                id: id.clone(),
                pod_sandbox_id: c.sandbox_id.clone(),
                metadata: Some(c.config.metadata.clone().unwrap_or(ContainerMetadata {
                    name: String::new(),
                    attempt: 0,
                })),
                image: c.config.image.clone(),
                state: c.state.to_proto() as i32,
                ..Default::default()
            })
            .collect();
        opts.filter(items)
    }

    async fn list_images(&self, _filter: Option<ImageFilter>) -> Result<Vec<Image>> {
        self.record("ListImages")?;
        Ok(self
            .images
            .lock()
            .iter()
            .map(|name| Image {
                id: Self::image_id(name),
                repo_tags: vec![name.clone()],
                ..Default::default()
            })
            .collect())
    }

    async fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>> {
        self.record("ImageStatus")?;
        Ok(self.images.lock().get(&image.image).map(|name| Image {
            id: Self::image_id(name),
            repo_tags: vec![name.clone()],
            ..Default::default()
        }))
    }

    async fn pull_image(
        &self,
        image: &str,
        _auth: Option<AuthConfig>,
        _sandbox_config: Option<&PodSandboxConfig>,
        _annotations: HashMap<String, String>,
    ) -> Result<String> {
        self.record("PullImage")?;
        self.images.lock().insert(image.to_string());
        Ok(Self::image_id(image))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.record("RemoveImage")?;
        self.images.lock().remove(image);
        Ok(())
    }
}

// ============================================================================
// Control plane and task reporter
// ============================================================================

#[derive(Default)]
pub struct RecordingControlPlane {
    pub pods: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub containers: Mutex<Vec<(String, HashMap<String, String>)>>,
    fail: Mutex<bool>,
}

impl RecordingControlPlane {
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    fn check(&self) -> Result<()> {
        if *self.fail.lock() {
            return Err(PodError::ControlPlane("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn set_pod_metadata(
        &self,
        pod_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.check()?;
        self.pods
            .lock()
            .push((pod_id.to_string(), metadata.clone()));
        Ok(())
    }

    async fn set_container_metadata(
        &self,
        container_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.check()?;
        self.containers
            .lock()
            .push((container_id.to_string(), metadata.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

#[derive(Default)]
pub struct RecordingReporter {
    pub outcomes: Mutex<Vec<(String, TaskOutcome)>>,
}

impl RecordingReporter {
    pub fn outcome(&self, task_id: &str) -> Option<TaskOutcome> {
        self.outcomes
            .lock()
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, o)| o.clone())
    }
}

#[async_trait]
impl TaskReporter for RecordingReporter {
    async fn complete(&self, task_id: &str, result: serde_json::Value) {
        self.outcomes
            .lock()
            .push((task_id.to_string(), TaskOutcome::Completed(result)));
    }

    async fn fail(&self, task_id: &str, reason: &str) {
        self.outcomes
            .lock()
            .push((task_id.to_string(), TaskOutcome::Failed(reason.to_string())));
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct TestEnv {
    pub deps: PodDeps,
    pub runtime: Arc<FakeRuntime>,
    pub host: Arc<FakeHost>,
    pub control: Arc<RecordingControlPlane>,
}

/// Dependencies over fakes, with pod homes under `servers_path`.
pub fn test_env(servers_path: &Path) -> TestEnv {
    let config = AgentConfig {
        servers_path: servers_path.to_path_buf(),
        ..Default::default()
    };
    let runtime = Arc::new(FakeRuntime::default());
    let host = Arc::new(FakeHost::default());
    let control = Arc::new(RecordingControlPlane::default());
    let deps = PodDeps::new(config, runtime.clone(), control.clone(), host.clone());
    TestEnv {
        deps,
        runtime,
        host,
        control,
    }
}
