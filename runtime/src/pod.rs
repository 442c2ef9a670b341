//! Pod runtime instance.
//!
//! One [`PodInstance`] per pod. It owns the pod descriptor (with the CRI
//! sandbox id and config snapshot), the local container registry and the
//! pod home directory, and turns lifecycle requests into CRI calls.
//!
//! Every operation holds the pod's mutex from the first lookup to the last
//! write, so check-then-act sequences (duplicate check before create, status
//! check before recreate) are atomic per pod. Image pulls hold a per-image
//! lock instead, shared across pods.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pod_core::container::{ContainerCreateInput, ContainerStatus, ImagePullPolicy, PullAuth};
use a3s_pod_core::error::{PodError, Result, ResultExt};
use a3s_pod_core::pod::{PodDesc, META_CRI_CONFIG, META_CRI_ID};
use a3s_pod_core::{AgentConfig, MountPropagation, PullImageInput};
use a3s_pod_cri::cri_api::{
    AuthConfig, Capability, ContainerConfig, ContainerMetadata, Device, DnsConfig, ImageSpec,
    KeyValue, LinuxContainerConfig, LinuxContainerSecurityContext, Mount,
    MountPropagation as CriMountPropagation, PodSandboxConfig, PodSandboxMetadata, PortMapping,
    Protocol,
};
use a3s_pod_cri::{CriContainerState, CriSandboxState, ListPodOptions, RuntimeClient};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::control::ControlPlane;
use crate::device::DeviceManagerRegistry;
use crate::host::HostOps;
use crate::loopdev::LoopAllocator;
use crate::mount::VolumeMounter;
use crate::registry::{ContainerRecord, ContainerRegistry, REGISTRY_FILE};
use crate::resolver::{validate_container_spec, ContainerDeviceSpec, ResolvedContainer};
use crate::store::{read_json, write_json_atomic};

/// Descriptor file inside the pod home.
pub const DESC_FILE: &str = "desc.json";

/// Sandbox log directory inside the pod home.
pub const LOGS_DIR: &str = "logs";

/// Parent of the volume mount points inside the pod home.
pub const VOLUMES_DIR: &str = "volumes";

/// Label carrying the pod id on sandboxes and containers.
pub const POD_ID_LABEL: &str = "io.a3s.pod.id";

/// Label carrying the logical container id.
pub const CONTAINER_ID_LABEL: &str = "io.a3s.container.id";

/// Capability every pod container gets.
const CAP_SYS_ADMIN: &str = "SYS_ADMIN";

const SANDBOX_ATTEMPT: u32 = 1;

/// Per-image-reference locks held across check-then-pull.
#[derive(Default)]
pub struct ImageLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ImageLocks {
    pub async fn lock(&self, image: &str) -> ImageGuard<'_> {
        let lock = self.locks.entry(image.to_string()).or_default().clone();
        ImageGuard {
            locks: self,
            image: image.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Images with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds one image lock; the entry is dropped once nobody else wants it.
pub struct ImageGuard<'a> {
    locks: &'a ImageLocks,
    image: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.image, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Everything a pod instance needs from the outside.
#[derive(Clone)]
pub struct PodDeps {
    pub config: Arc<AgentConfig>,
    pub runtime: Arc<dyn RuntimeClient>,
    pub control: Arc<dyn ControlPlane>,
    pub host: Arc<dyn HostOps>,
    pub loops: Arc<LoopAllocator>,
    pub devices: Arc<DeviceManagerRegistry>,
    pub image_locks: Arc<ImageLocks>,
}

impl PodDeps {
    /// Wire the host-side resources (loop allocator, device managers) around
    /// the given runtime, control plane and host backend.
    pub fn new(
        config: AgentConfig,
        runtime: Arc<dyn RuntimeClient>,
        control: Arc<dyn ControlPlane>,
        host: Arc<dyn HostOps>,
    ) -> Self {
        let loops = Arc::new(LoopAllocator::new(host.clone()));
        let devices = Arc::new(DeviceManagerRegistry::with_defaults(
            &config,
            host.clone(),
            loops.clone(),
        ));
        Self {
            config: Arc::new(config),
            runtime,
            control,
            host,
            loops,
            devices,
            image_locks: Arc::new(ImageLocks::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPodResult {
    pub sandbox_id: String,
    pub is_running: bool,
}

/// Map a declared port protocol onto the CRI enum.
pub fn map_protocol(protocol: &str) -> Result<Protocol> {
    match protocol {
        "tcp" => Ok(Protocol::Tcp),
        "udp" => Ok(Protocol::Udp),
        "sctp" => Ok(Protocol::Sctp),
        other => Err(PodError::Validation(format!(
            "invalid port mapping protocol {}, choose from [tcp, udp, sctp]",
            other
        ))),
    }
}

fn map_propagation(propagation: MountPropagation) -> CriMountPropagation {
    match propagation {
        MountPropagation::Private => CriMountPropagation::PropagationPrivate,
        MountPropagation::HostToContainer => CriMountPropagation::PropagationHostToContainer,
        MountPropagation::Bidirectional => CriMountPropagation::PropagationBidirectional,
    }
}

/// Orchestration status for a runtime-reported state.
pub fn status_from_cri(state: CriContainerState) -> ContainerStatus {
    match state {
        CriContainerState::Created => ContainerStatus::Created,
        CriContainerState::Running => ContainerStatus::Running,
        CriContainerState::Exited => ContainerStatus::Exited,
        CriContainerState::Unknown => ContainerStatus::Unknown,
    }
}

fn to_cri_auth(auth: &PullAuth) -> AuthConfig {
    AuthConfig {
        username: auth.username.clone(),
        password: auth.password.clone(),
        auth: auth.auth.clone(),
        server_address: auth.server_address.clone(),
        identity_token: auth.identity_token.clone(),
        registry_token: auth.registry_token.clone(),
    }
}

/// Sandbox config for a pod. Port protocols are checked here, before
/// anything reaches the runtime.
pub fn build_sandbox_config(desc: &PodDesc, log_directory: &Path) -> Result<PodSandboxConfig> {
    let port_mappings = desc
        .port_mappings
        .iter()
        .map(|pm| {
            Ok(PortMapping {
                protocol: map_protocol(&pm.protocol)? as i32,
                container_port: pm.container_port,
                host_port: pm.host_port,
                host_ip: pm.host_ip.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut labels = HashMap::new();
    labels.insert(POD_ID_LABEL.to_string(), desc.id.clone());

    Ok(PodSandboxConfig {
        metadata: Some(PodSandboxMetadata {
            name: desc.name.clone(),
            uid: desc.id.clone(),
            namespace: desc.namespace.clone(),
            attempt: SANDBOX_ATTEMPT,
        }),
        hostname: desc.hostname.clone(),
        log_directory: log_directory.to_string_lossy().into_owned(),
        dns_config: desc.dns.as_ref().map(|dns| DnsConfig {
            servers: dns.servers.clone(),
            searches: dns.searches.clone(),
            options: dns.options.clone(),
        }),
        port_mappings,
        labels,
        ..Default::default()
    })
}

/// CRI container config from the declared spec and the realized devices and
/// mounts.
pub fn build_container_config(
    pod_id: &str,
    ctr_id: &str,
    input: &ContainerCreateInput,
    devices: Vec<Device>,
    mounts: Vec<Mount>,
) -> ContainerConfig {
    let spec = &input.spec;
    let name = if input.name.is_empty() {
        ctr_id.to_string()
    } else {
        input.name.clone()
    };

    let mut labels = spec.labels.clone();
    labels.insert(POD_ID_LABEL.to_string(), pod_id.to_string());
    labels.insert(CONTAINER_ID_LABEL.to_string(), ctr_id.to_string());

    ContainerConfig {
        metadata: Some(ContainerMetadata { name, attempt: 0 }),
        image: Some(ImageSpec {
            image: spec.image.clone(),
            ..Default::default()
        }),
        command: spec.command.clone(),
        args: spec.args.clone(),
        working_dir: spec.working_dir.clone(),
        envs: spec
            .envs
            .iter()
            .map(|kv| KeyValue {
                key: kv.key.clone(),
                value: kv.value.clone(),
            })
            .collect(),
        mounts,
        devices,
        labels,
        annotations: spec.annotations.clone(),
        log_path: format!("{}.log", ctr_id),
        linux: Some(LinuxContainerConfig {
            security_context: Some(LinuxContainerSecurityContext {
                capabilities: Some(Capability {
                    add_capabilities: vec![CAP_SYS_ADMIN.to_string()],
                    ..Default::default()
                }),
                privileged: spec.privileged,
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

struct PodState {
    desc: PodDesc,
    registry: ContainerRegistry,
}

pub struct PodInstance {
    id: String,
    home: PathBuf,
    deps: PodDeps,
    mounter: VolumeMounter,
    state: Mutex<PodState>,
}

impl PodInstance {
    /// Set up a new pod: create its home and write the descriptor.
    pub fn create(desc: PodDesc, deps: PodDeps) -> Result<Self> {
        desc.validate()?;
        let home = deps.config.pod_home(&desc.id);
        std::fs::create_dir_all(&home).map_err(|e| {
            PodError::Other(format!(
                "failed to create pod home {}: {}",
                home.display(),
                e
            ))
        })?;
        write_json_atomic(&home.join(DESC_FILE), &desc)?;
        let registry = ContainerRegistry::load(home.join(REGISTRY_FILE))?;
        tracing::info!(pod_id = %desc.id, home = %home.display(), "Created pod");
        Ok(Self::from_parts(home, desc, registry, deps))
    }

    /// Restore a pod from its home directory after an agent restart.
    pub fn load(home: &Path, deps: PodDeps) -> Result<Self> {
        let desc_path = home.join(DESC_FILE);
        let desc: PodDesc = read_json(&desc_path)?.ok_or_else(|| {
            PodError::NotFound(format!("pod descriptor {}", desc_path.display()))
        })?;
        let registry = ContainerRegistry::load(home.join(REGISTRY_FILE))?;
        tracing::debug!(
            pod_id = %desc.id,
            containers = registry.len(),
            "Loaded pod"
        );
        Ok(Self::from_parts(home.to_path_buf(), desc, registry, deps))
    }

    fn from_parts(home: PathBuf, desc: PodDesc, registry: ContainerRegistry, deps: PodDeps) -> Self {
        let mounter = VolumeMounter::new(deps.host.clone(), deps.loops.clone());
        Self {
            id: desc.id.clone(),
            home,
            deps,
            mounter,
            state: Mutex::new(PodState { desc, registry }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join(LOGS_DIR)
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.home.join(VOLUMES_DIR)
    }

    pub async fn desc(&self) -> PodDesc {
        self.state.lock().await.desc.clone()
    }

    pub async fn sandbox_id(&self) -> Option<String> {
        self.state.lock().await.desc.cri_id().map(str::to_string)
    }

    /// Registry entries, ordered by index.
    pub async fn list_containers(&self) -> Vec<ContainerRecord> {
        self.state.lock().await.registry.list()
    }

    fn holder(&self, ctr_id: &str) -> String {
        format!("{}/{}", self.id, ctr_id)
    }

    fn save_desc(&self, desc: &PodDesc) -> Result<()> {
        write_json_atomic(&self.home.join(DESC_FILE), desc)
    }

    /// Sandbox id and config of a started pod.
    fn sandbox(&self, desc: &PodDesc) -> Result<(String, PodSandboxConfig)> {
        let sandbox_id = desc.cri_id().ok_or_else(|| {
            PodError::InvalidState(format!("pod {} has no sandbox, start it first", self.id))
        })?;
        let config = match desc.cri_config() {
            Some(json) => serde_json::from_str(json)?,
            None => build_sandbox_config(desc, &self.logs_dir())?,
        };
        Ok((sandbox_id.to_string(), config))
    }

    /// Create the CRI sandbox and record its id locally and upstream.
    ///
    /// A failed upstream update is returned as an error; the sandbox and the
    /// local descriptor are kept so a later sync can reconcile.
    pub async fn start_pod(&self) -> Result<StartPodResult> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.desc.cri_id() {
            return Err(PodError::InvalidState(format!(
                "pod {} already has sandbox {}",
                self.id, existing
            )));
        }

        let logs_dir = self.logs_dir();
        let config = build_sandbox_config(&state.desc, &logs_dir)?;
        tokio::fs::create_dir_all(&logs_dir).await?;

        tracing::info!(pod_id = %self.id, ports = config.port_mappings.len(), "Starting pod sandbox");
        let sandbox_id = self
            .deps
            .runtime
            .run_pod_sandbox(&config, &self.deps.config.runtime_handler)
            .await
            .with_context(|| format!("start pod {}", self.id))?;

        let config_json = serde_json::to_string(&config)?;
        state.desc.set_cri_info(&sandbox_id, &config_json);
        self.save_desc(&state.desc)?;

        let mut metadata = HashMap::new();
        metadata.insert(META_CRI_ID.to_string(), sandbox_id.clone());
        metadata.insert(META_CRI_CONFIG.to_string(), config_json);
        self.deps
            .control
            .set_pod_metadata(&self.id, &metadata)
            .await
            .with_context(|| format!("record sandbox {} of pod {}", sandbox_id, self.id))?;

        tracing::info!(pod_id = %self.id, sandbox_id = %sandbox_id, "Pod sandbox started");
        Ok(StartPodResult {
            sandbox_id,
            is_running: false,
        })
    }

    /// Whether the pod's sandbox is ready in the runtime.
    pub async fn is_running(&self) -> Result<bool> {
        let Some(sandbox_id) = self.sandbox_id().await else {
            return Ok(false);
        };
        let opts = ListPodOptions {
            id: sandbox_id,
            state: Some(CriSandboxState::Ready),
            ..Default::default()
        };
        let sandboxes = self.deps.runtime.list_pods(&opts).await?;
        Ok(sandboxes.iter().any(|sb| {
            sb.metadata
                .as_ref()
                .map_or(false, |meta| meta.uid == self.id)
        }))
    }

    /// Create a container and record it. Returns the CRI id.
    pub async fn create_container(&self, ctr_id: &str, input: &ContainerCreateInput) -> Result<String> {
        let mut state = self.state.lock().await;
        self.create_locked(&mut state, ctr_id, input).await
    }

    async fn create_locked(
        &self,
        state: &mut PodState,
        ctr_id: &str,
        input: &ContainerCreateInput,
    ) -> Result<String> {
        if ctr_id.is_empty() {
            return Err(PodError::Validation("container id is empty".to_string()));
        }
        if state.registry.contains(ctr_id) {
            return Err(PodError::Validation(format!(
                "container {} already exists in pod {}",
                ctr_id, self.id
            )));
        }
        let (sandbox_id, sandbox_config) = self.sandbox(&state.desc)?;
        let resolved = validate_container_spec(
            &state.desc,
            &self.volumes_dir(),
            &input.spec,
            &self.deps.devices,
        )?;

        self.ensure_image(
            &PullImageInput {
                image: input.spec.image.clone(),
                pull_policy: input.spec.image_pull_policy,
                auth: None,
            },
            Some(&sandbox_config),
        )
        .await
        .with_context(|| format!("pull image {} before create container", input.spec.image))?;

        let holder = self.holder(ctr_id);
        let (devices, mounts) = match self.realize(&state.desc, &resolved, &holder).await {
            Ok(realized) => realized,
            Err(e) => {
                self.release_claims(&holder).await;
                return Err(e);
            }
        };
        let config = build_container_config(&self.id, ctr_id, input, devices, mounts);

        tracing::info!(
            pod_id = %self.id,
            container_id = %ctr_id,
            image = %input.spec.image,
            "Creating container"
        );
        let cri_id = match self
            .deps
            .runtime
            .create_container(&sandbox_id, &sandbox_config, &config, false)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.release_claims(&holder).await;
                return Err(e).with_context(|| format!("create container {}", ctr_id));
            }
        };

        if let Err(e) = state.registry.insert(ContainerRecord {
            id: ctr_id.to_string(),
            index: input.index,
            cri_id: cri_id.clone(),
        }) {
            if let Err(remove_err) = self.deps.runtime.remove_container(&cri_id).await {
                tracing::warn!(cri_id = %cri_id, error = %remove_err, "Failed to remove unrecorded container");
            }
            self.release_claims(&holder).await;
            return Err(e).with_context(|| format!("record container {}", ctr_id));
        }

        let mut metadata = HashMap::new();
        metadata.insert(META_CRI_ID.to_string(), cri_id.clone());
        self.deps
            .control
            .set_container_metadata(ctr_id, &metadata)
            .await
            .with_context(|| format!("record cri id of container {}", ctr_id))?;

        tracing::info!(pod_id = %self.id, container_id = %ctr_id, cri_id = %cri_id, "Container created");
        Ok(cri_id)
    }

    /// Turn resolved devices and mounts into CRI devices and mounts, claiming
    /// host resources on behalf of `holder`.
    async fn realize(
        &self,
        desc: &PodDesc,
        resolved: &ResolvedContainer,
        holder: &str,
    ) -> Result<(Vec<Device>, Vec<Mount>)> {
        let mut devices = Vec::new();
        for spec in &resolved.devices {
            match spec {
                ContainerDeviceSpec::Host {
                    host_path,
                    container_path,
                    permissions,
                } => devices.push(Device {
                    container_path: container_path.clone(),
                    host_path: host_path.clone(),
                    permissions: permissions.clone(),
                }),
                ContainerDeviceSpec::Isolated {
                    device,
                    container_path,
                } => {
                    let manager = self.deps.devices.get(&device.dev_type)?;
                    let created = manager
                        .new_container_devices(desc, device, container_path, holder)
                        .await
                        .with_context(|| format!("isolated device {}", device.id))?;
                    devices.extend(created);
                }
            }
        }

        let mut mounts = Vec::new();
        for spec in &resolved.mounts {
            if spec.raw {
                let loop_dev = self.deps.loops.acquire(&spec.disk_path, holder).await?;
                devices.push(Device {
                    container_path: spec.container_path.clone(),
                    host_path: loop_dev,
                    permissions: if spec.read_only { "rm" } else { "rwm" }.to_string(),
                });
            } else {
                self.mounter.ensure_mounted(&self.id, spec).await?;
                mounts.push(Mount {
                    container_path: spec.container_path.clone(),
                    host_path: spec.host_path.to_string_lossy().into_owned(),
                    readonly: spec.read_only,
                    selinux_relabel: false,
                    propagation: map_propagation(spec.propagation) as i32,
                });
            }
        }
        Ok((devices, mounts))
    }

    async fn release_claims(&self, holder: &str) {
        if let Err(e) = self.deps.devices.release_all(holder).await {
            tracing::warn!(holder, error = %e, "Failed to release container devices");
        }
        if let Err(e) = self.deps.loops.release(holder).await {
            tracing::warn!(holder, error = %e, "Failed to release loop devices");
        }
    }

    /// Start a container, creating it first when the registry does not know
    /// it and recreating it when the runtime reports it exited.
    pub async fn start_container(&self, ctr_id: &str, input: &ContainerCreateInput) -> Result<String> {
        let mut state = self.state.lock().await;

        let known = state.registry.get(ctr_id).map(|r| r.cri_id.clone());
        let cri_id = match known {
            None => {
                tracing::info!(pod_id = %self.id, container_id = %ctr_id, "Container not created yet, creating");
                self.create_locked(&mut state, ctr_id, input).await?
            }
            Some(cri_id) => {
                let runtime_state = match self.deps.runtime.container_status(&cri_id).await {
                    Ok(status) => status.state,
                    // Registry entry without a runtime container: recreate.
                    Err(e) if e.is_not_found() => CriContainerState::Exited,
                    Err(e) => {
                        return Err(e).with_context(|| format!("status of container {}", ctr_id))
                    }
                };
                match runtime_state {
                    CriContainerState::Created => cri_id,
                    CriContainerState::Exited => {
                        tracing::info!(pod_id = %self.id, container_id = %ctr_id, "Container exited, recreating");
                        self.delete_locked(&mut state, ctr_id).await?;
                        self.create_locked(&mut state, ctr_id, input).await?
                    }
                    other => {
                        return Err(PodError::InvalidState(format!(
                            "container {} is {}, only created or exited containers can be started",
                            ctr_id,
                            status_from_cri(other)
                        )))
                    }
                }
            }
        };

        self.deps
            .runtime
            .start_container(&cri_id)
            .await
            .with_context(|| format!("start container {}", ctr_id))?;
        tracing::info!(pod_id = %self.id, container_id = %ctr_id, cri_id = %cri_id, "Container started");
        Ok(cri_id)
    }

    fn lookup(&self, state: &PodState, ctr_id: &str) -> Result<String> {
        state
            .registry
            .get(ctr_id)
            .map(|r| r.cri_id.clone())
            .ok_or_else(|| {
                PodError::NotFound(format!("container {} in pod {}", ctr_id, self.id))
            })
    }

    /// Stop with a grace period in seconds; 0 kills immediately.
    pub async fn stop_container(&self, ctr_id: &str, timeout_secs: i64) -> Result<()> {
        let state = self.state.lock().await;
        let cri_id = self.lookup(&state, ctr_id)?;
        tracing::info!(pod_id = %self.id, container_id = %ctr_id, timeout_secs, "Stopping container");
        self.deps
            .runtime
            .stop_container(&cri_id, timeout_secs)
            .await
            .with_context(|| format!("stop container {}", ctr_id))
    }

    /// Remove a container. Deleting an unknown id, or one the runtime no
    /// longer has, succeeds.
    pub async fn delete_container(&self, ctr_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.delete_locked(&mut state, ctr_id).await
    }

    async fn delete_locked(&self, state: &mut PodState, ctr_id: &str) -> Result<()> {
        match state.registry.get(ctr_id).map(|r| r.cri_id.clone()) {
            Some(cri_id) => match self.deps.runtime.remove_container(&cri_id).await {
                Ok(()) => {
                    tracing::info!(pod_id = %self.id, container_id = %ctr_id, cri_id = %cri_id, "Container removed")
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(pod_id = %self.id, container_id = %ctr_id, cri_id = %cri_id, "Container already gone from runtime")
                }
                Err(e) => return Err(e).with_context(|| format!("delete container {}", ctr_id)),
            },
            None => {
                tracing::debug!(pod_id = %self.id, container_id = %ctr_id, "Container not in registry")
            }
        }

        self.release_claims(&self.holder(ctr_id)).await;
        state.registry.remove(ctr_id)?;
        Ok(())
    }

    /// Runtime view of a container. Reads only.
    pub async fn sync_container_status(&self, ctr_id: &str) -> Result<ContainerStatus> {
        let state = self.state.lock().await;
        let cri_id = self.lookup(&state, ctr_id)?;
        let status = self
            .deps
            .runtime
            .container_status(&cri_id)
            .await
            .with_context(|| format!("status of container {}", ctr_id))?;
        Ok(status_from_cri(status.state))
    }

    /// Pull an image for this pod, honouring the pull policy.
    pub async fn pull_image(&self, input: &PullImageInput) -> Result<String> {
        input.validate()?;
        let sandbox_config: Option<PodSandboxConfig> = {
            let state = self.state.lock().await;
            state
                .desc
                .cri_config()
                .map(serde_json::from_str)
                .transpose()?
        };
        self.ensure_image(input, sandbox_config.as_ref())
            .await
            .with_context(|| format!("pull image {}", input.image))
    }

    async fn ensure_image(
        &self,
        input: &PullImageInput,
        sandbox_config: Option<&PodSandboxConfig>,
    ) -> Result<String> {
        let _guard = self.deps.image_locks.lock(&input.image).await;

        if input.pull_policy == ImagePullPolicy::IfNotPresent {
            let spec = ImageSpec {
                image: input.image.clone(),
                ..Default::default()
            };
            if let Some(image) = self.deps.runtime.image_status(&spec).await? {
                tracing::debug!(image = %input.image, image_id = %image.id, "Image present, skipping pull");
                return Ok(image.id);
            }
        }

        tracing::info!(pod_id = %self.id, image = %input.image, policy = %input.pull_policy, "Pulling image");
        self.deps
            .runtime
            .pull_image(
                &input.image,
                input.auth.as_ref().map(to_cri_auth),
                sandbox_config,
                HashMap::new(),
            )
            .await
    }

    /// Tear the pod down: sandbox, volume mounts, loop devices, home.
    pub async fn clean_pod(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(sandbox_id) = state.desc.cri_id().map(str::to_string) {
            tolerate_not_found(
                self.deps.runtime.stop_pod_sandbox(&sandbox_id).await,
                "stop sandbox",
                &sandbox_id,
            )?;
            tolerate_not_found(
                self.deps.runtime.remove_pod_sandbox(&sandbox_id).await,
                "remove sandbox",
                &sandbox_id,
            )?;
            state.desc.clear_cri_info();
            tracing::info!(pod_id = %self.id, sandbox_id = %sandbox_id, "Pod sandbox removed");
        }

        for record in state.registry.list() {
            self.release_claims(&self.holder(&record.id)).await;
        }
        self.mounter
            .unmount_all(&self.id, &self.volumes_dir())
            .await
            .with_context(|| format!("unmount volumes of pod {}", self.id))?;
        let disks: Vec<PathBuf> = state.desc.disks.iter().map(|d| d.path.clone()).collect();
        self.deps.loops.detach_all(&disks).await?;

        if self.home.exists() {
            tokio::fs::remove_dir_all(&self.home).await?;
        }
        tracing::info!(pod_id = %self.id, "Pod cleaned");
        Ok(())
    }
}

fn tolerate_not_found(result: Result<()>, operation: &str, target: &str) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::warn!(target_id = %target, "{} skipped: not found", operation);
            Ok(())
        }
        other => other.with_context(|| format!("{} {}", operation, target)),
    }
}
