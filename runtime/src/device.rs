//! Container device managers.
//!
//! Isolated devices are expanded into CRI devices by a manager chosen by the
//! device's type tag. The set of managers is composed explicitly in
//! [`DeviceManagerRegistry::with_defaults`]; a type without a manager is not
//! valid for containers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pod_core::error::{PodError, Result};
use a3s_pod_core::pod::{IsolatedDevice, PodDesc};
use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::Device;
use async_trait::async_trait;

use crate::host::HostOps;
use crate::loopdev::LoopAllocator;
use crate::resolver::RAW_DISK_FORMAT;

/// Android binder devices created through the binder control node.
pub const CPH_AOSP_BINDER: &str = "CPH_AOSP_BINDER";

/// Raw disk image exposed to the container through a loop device.
pub const CONTAINER_LOCAL_RAW: &str = "CONTAINER_LOCAL_RAW";

/// Permissions granted on every managed device.
const MANAGED_DEVICE_PERMISSIONS: &str = "rwm";

#[async_trait]
pub trait ContainerDeviceManager: Send + Sync {
    fn device_type(&self) -> &'static str;

    /// Produce the CRI devices for one isolated device. Host resources
    /// claimed here are recorded against `holder`.
    async fn new_container_devices(
        &self,
        pod: &PodDesc,
        device: &IsolatedDevice,
        container_path: &str,
        holder: &str,
    ) -> Result<Vec<Device>>;

    /// Give back whatever `holder` claimed.
    async fn release(&self, _holder: &str) -> Result<()> {
        Ok(())
    }
}

/// Type tag → manager.
#[derive(Default, Clone)]
pub struct DeviceManagerRegistry {
    managers: HashMap<&'static str, Arc<dyn ContainerDeviceManager>>,
}

impl DeviceManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in managers.
    pub fn with_defaults(
        config: &AgentConfig,
        host: Arc<dyn HostOps>,
        loops: Arc<LoopAllocator>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BinderDeviceManager::new(
            host,
            config.binder_helper.clone(),
            config.binder_control_path.clone(),
        )));
        registry.register(Arc::new(LocalRawDiskManager::new(loops)));
        registry
    }

    pub fn register(&mut self, manager: Arc<dyn ContainerDeviceManager>) {
        self.managers.insert(manager.device_type(), manager);
    }

    pub fn supports(&self, dev_type: &str) -> bool {
        self.managers.contains_key(dev_type)
    }

    /// Supported type tags, sorted.
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.managers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn get(&self, dev_type: &str) -> Result<Arc<dyn ContainerDeviceManager>> {
        self.managers.get(dev_type).cloned().ok_or_else(|| {
            PodError::Validation(format!("no container device manager for type {}", dev_type))
        })
    }

    /// Release `holder` from every manager, returning the first failure.
    pub async fn release_all(&self, holder: &str) -> Result<()> {
        let mut first_err = None;
        for manager in self.managers.values() {
            if let Err(e) = manager.release(holder).await {
                tracing::warn!(
                    device_type = manager.device_type(),
                    holder,
                    error = %e,
                    "Failed to release container devices"
                );
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Binder devices for Android containers.
///
/// The host node is created on demand; inside the container it appears as
/// `/dev/binder`, `/dev/hwbinder` and `/dev/vndbinder`.
pub struct BinderDeviceManager {
    host: Arc<dyn HostOps>,
    helper: PathBuf,
    control_path: PathBuf,
}

impl BinderDeviceManager {
    pub fn new(host: Arc<dyn HostOps>, helper: PathBuf, control_path: PathBuf) -> Self {
        Self {
            host,
            helper,
            control_path,
        }
    }
}

#[async_trait]
impl ContainerDeviceManager for BinderDeviceManager {
    fn device_type(&self) -> &'static str {
        CPH_AOSP_BINDER
    }

    async fn new_container_devices(
        &self,
        _pod: &PodDesc,
        device: &IsolatedDevice,
        _container_path: &str,
        _holder: &str,
    ) -> Result<Vec<Device>> {
        if device.path.is_empty() {
            return Err(PodError::Validation(format!(
                "binder device {} has no host path",
                device.id
            )));
        }
        let host_path = Path::new(&device.path);
        if self.host.path_exists(host_path) {
            tracing::info!(path = %device.path, "Binder device already exists");
        } else {
            let name = host_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    PodError::Validation(format!("invalid binder device path {}", device.path))
                })?;
            self.host
                .create_binder_device(&self.helper, &self.control_path, name)
                .await?;
        }

        Ok(["/dev/binder", "/dev/hwbinder", "/dev/vndbinder"]
            .iter()
            .map(|container_path| Device {
                container_path: container_path.to_string(),
                host_path: device.path.clone(),
                permissions: MANAGED_DEVICE_PERMISSIONS.to_string(),
            })
            .collect())
    }
}

/// Raw pod disk handed to the container as a block device.
pub struct LocalRawDiskManager {
    loops: Arc<LoopAllocator>,
}

impl LocalRawDiskManager {
    pub fn new(loops: Arc<LoopAllocator>) -> Self {
        Self { loops }
    }
}

#[async_trait]
impl ContainerDeviceManager for LocalRawDiskManager {
    fn device_type(&self) -> &'static str {
        CONTAINER_LOCAL_RAW
    }

    async fn new_container_devices(
        &self,
        pod: &PodDesc,
        device: &IsolatedDevice,
        container_path: &str,
        holder: &str,
    ) -> Result<Vec<Device>> {
        if container_path.is_empty() {
            return Err(PodError::Validation(format!(
                "raw disk device {} needs a container_path",
                device.id
            )));
        }
        let disk = pod
            .disks
            .iter()
            .find(|d| d.path == Path::new(&device.path))
            .ok_or_else(|| PodError::NotFound(format!("disk with path {}", device.path)))?;
        if disk.format != RAW_DISK_FORMAT {
            return Err(PodError::Validation(format!(
                "disk {} format isn't {}",
                disk.id, RAW_DISK_FORMAT
            )));
        }

        let loop_dev = self.loops.acquire(&disk.path, holder).await?;
        Ok(vec![Device {
            container_path: container_path.to_string(),
            host_path: loop_dev,
            permissions: MANAGED_DEVICE_PERMISSIONS.to_string(),
        }])
    }

    async fn release(&self, holder: &str) -> Result<()> {
        self.loops.release(holder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;
    use a3s_pod_core::pod::PodDisk;

    fn setup() -> (DeviceManagerRegistry, Arc<FakeHost>, Arc<LoopAllocator>) {
        let host = Arc::new(FakeHost::default());
        let loops = Arc::new(LoopAllocator::new(host.clone()));
        let registry =
            DeviceManagerRegistry::with_defaults(&AgentConfig::default(), host.clone(), loops.clone());
        (registry, host, loops)
    }

    fn pod_with_disk(format: &str) -> PodDesc {
        PodDesc {
            id: "p1".to_string(),
            disks: vec![PodDisk {
                id: "d-0".to_string(),
                path: PathBuf::from("/disks/d-0.img"),
                format: format.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn raw_device() -> IsolatedDevice {
        IsolatedDevice {
            id: "raw-0".to_string(),
            dev_type: CONTAINER_LOCAL_RAW.to_string(),
            path: "/disks/d-0.img".to_string(),
            addr: String::new(),
        }
    }

    #[test]
    fn test_default_types() {
        let (registry, _, _) = setup();
        assert_eq!(registry.types(), vec![CONTAINER_LOCAL_RAW, CPH_AOSP_BINDER]);
        assert!(registry.supports(CPH_AOSP_BINDER));
        assert!(!registry.supports("GPU-HPC"));
        assert!(registry.get("GPU-HPC").is_err());
    }

    #[tokio::test]
    async fn test_binder_creates_missing_node() {
        let (registry, host, _) = setup();
        let dev = IsolatedDevice {
            id: "binder-0".to_string(),
            dev_type: CPH_AOSP_BINDER.to_string(),
            path: "/dev/binder3".to_string(),
            addr: String::new(),
        };
        let manager = registry.get(CPH_AOSP_BINDER).unwrap();
        let devices = manager
            .new_container_devices(&PodDesc::default(), &dev, "", "p1/c1")
            .await
            .unwrap();

        assert_eq!(host.binders_created(), vec!["binder3".to_string()]);
        let paths: Vec<_> = devices.iter().map(|d| d.container_path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/binder", "/dev/hwbinder", "/dev/vndbinder"]);
        assert!(devices.iter().all(|d| d.host_path == "/dev/binder3"));
        assert!(devices.iter().all(|d| d.permissions == "rwm"));
    }

    #[tokio::test]
    async fn test_binder_reuses_existing_node() {
        let (registry, host, _) = setup();
        host.add_existing("/dev/binder3");
        let dev = IsolatedDevice {
            id: "binder-0".to_string(),
            dev_type: CPH_AOSP_BINDER.to_string(),
            path: "/dev/binder3".to_string(),
            addr: String::new(),
        };
        registry
            .get(CPH_AOSP_BINDER)
            .unwrap()
            .new_container_devices(&PodDesc::default(), &dev, "", "p1/c1")
            .await
            .unwrap();
        assert!(host.binders_created().is_empty());
    }

    #[tokio::test]
    async fn test_local_raw_attaches_and_releases() {
        let (registry, host, loops) = setup();
        let manager = registry.get(CONTAINER_LOCAL_RAW).unwrap();
        let devices = manager
            .new_container_devices(&pod_with_disk("raw"), &raw_device(), "/dev/vdb", "p1/c1")
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].container_path, "/dev/vdb");
        assert!(devices[0].host_path.starts_with("/dev/loop"));
        assert_eq!(loops.refcount(Path::new("/disks/d-0.img")).await, 1);

        registry.release_all("p1/c1").await.unwrap();
        assert_eq!(host.detached().len(), 1);
    }

    #[tokio::test]
    async fn test_local_raw_rejects_non_raw_disk() {
        let (registry, host, _) = setup();
        let err = registry
            .get(CONTAINER_LOCAL_RAW)
            .unwrap()
            .new_container_devices(&pod_with_disk("qcow2"), &raw_device(), "/dev/vdb", "p1/c1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("isn't raw"));
        assert_eq!(host.attach_count(), 0);
    }
}
