//! Volume/device resolution.
//!
//! Turns a container's declared volume mounts and device requests into
//! concrete host-side specs, checked against the owning pod's disks and
//! isolated devices. Pure: reads the descriptor only, so it runs once at
//! validation time and again at creation time without leaking anything.

use std::path::{Path, PathBuf};

use a3s_pod_core::container::{ContainerDevice, ContainerSpec, MountPropagation, VolumeMount};
use a3s_pod_core::error::{PodError, Result};
use a3s_pod_core::pod::{check_disk_index, IsolatedDevice, PodDesc, PodDisk, VolumeSource};
use a3s_pod_core::VolumeMountKind;

use crate::device::DeviceManagerRegistry;

/// Disk format that can be exposed as a raw block device.
pub const RAW_DISK_FORMAT: &str = "raw";

/// Concrete mount of a disk-backed volume.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMountSpec {
    pub disk_id: String,
    /// Backing image of the disk
    pub disk_path: PathBuf,
    /// Filesystem mount point on the host; the disk image itself for raw mounts
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
    pub propagation: MountPropagation,
    /// Expose the disk as a block device instead of mounting it
    pub raw: bool,
    pub fs: Option<String>,
}

/// Concrete device request.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerDeviceSpec {
    Host {
        host_path: String,
        container_path: String,
        permissions: String,
    },
    Isolated {
        device: IsolatedDevice,
        container_path: String,
    },
}

/// All devices and mounts of one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedContainer {
    pub devices: Vec<ContainerDeviceSpec>,
    pub mounts: Vec<HostMountSpec>,
}

/// Host directory where the filesystem of `disk_id` is mounted.
pub fn volume_mount_point(volumes_dir: &Path, disk_id: &str) -> PathBuf {
    volumes_dir.join(disk_id)
}

fn resolve_disk<'a>(pod: &'a PodDesc, volume_name: &str) -> Result<&'a PodDisk> {
    let volume = pod
        .find_volume(volume_name)
        .ok_or_else(|| PodError::NotFound(format!("volume {} of pod {}", volume_name, pod.id)))?;

    match &volume.source {
        VolumeSource::Disk(disk) => {
            if let Some(index) = disk.index {
                let idx = check_disk_index(index, pod.disks.len())?;
                return Ok(&pod.disks[idx]);
            }
            if disk.id.is_empty() {
                return Err(PodError::Validation(format!(
                    "volume {}: one of disk.id or disk.index must be set",
                    volume_name
                )));
            }
            pod.find_disk(&disk.id)
                .ok_or_else(|| PodError::NotFound(format!("disk {} of pod {}", disk.id, pod.id)))
        }
    }
}

/// Resolve one volume mount against the pod's volumes and disks.
pub fn resolve_volume_mount(
    pod: &PodDesc,
    volumes_dir: &Path,
    mount: &VolumeMount,
) -> Result<HostMountSpec> {
    if mount.mount_path.is_empty() {
        return Err(PodError::Validation(format!(
            "volume mount {}: mount_path is empty",
            mount.name
        )));
    }
    let kind = mount.kind.as_ref().ok_or_else(|| {
        PodError::Validation(format!(
            "volume mount {}: one of the mount kinds must be set",
            mount.name
        ))
    })?;

    match kind {
        VolumeMountKind::Disk { raw } => {
            let disk = resolve_disk(pod, &mount.name)?;
            if *raw {
                if disk.format != RAW_DISK_FORMAT {
                    return Err(PodError::Validation(format!(
                        "disk {} format {} can't be attached raw, only {} is supported",
                        disk.id, disk.format, RAW_DISK_FORMAT
                    )));
                }
            } else if disk.fs.as_deref().map_or(true, str::is_empty) {
                return Err(PodError::Validation(format!(
                    "disk {} has no filesystem to mount",
                    disk.id
                )));
            }

            let host_path = if *raw {
                disk.path.clone()
            } else {
                volume_mount_point(volumes_dir, &disk.id)
            };
            Ok(HostMountSpec {
                disk_id: disk.id.clone(),
                disk_path: disk.path.clone(),
                host_path,
                container_path: mount.mount_path.clone(),
                read_only: mount.read_only,
                propagation: mount.propagation,
                raw: *raw,
                fs: disk.fs.clone(),
            })
        }
    }
}

/// Check a device permission string: non-empty, only `r`, `w`, `m`.
pub fn validate_permissions(permissions: &str) -> Result<()> {
    if permissions.is_empty() {
        return Err(PodError::Validation("device permissions is empty".to_string()));
    }
    if let Some(c) = permissions.chars().find(|c| !matches!(c, 'r' | 'w' | 'm')) {
        return Err(PodError::Validation(format!(
            "device permission {} is invalid, choose from [r, w, m]",
            c
        )));
    }
    Ok(())
}

/// Resolve one device request.
pub fn resolve_device(
    pod: &PodDesc,
    device: &ContainerDevice,
    registry: &DeviceManagerRegistry,
) -> Result<ContainerDeviceSpec> {
    match device {
        ContainerDevice::Host {
            host_path,
            container_path,
            permissions,
        } => {
            if host_path.is_empty() {
                return Err(PodError::Validation("device host_path is empty".to_string()));
            }
            if container_path.is_empty() {
                return Err(PodError::Validation(
                    "device container_path is empty".to_string(),
                ));
            }
            validate_permissions(permissions)?;
            Ok(ContainerDeviceSpec::Host {
                host_path: host_path.clone(),
                container_path: container_path.clone(),
                permissions: permissions.clone(),
            })
        }
        ContainerDevice::Isolated { id, container_path } => {
            if id.is_empty() {
                return Err(PodError::Validation("isolated device id is empty".to_string()));
            }
            let dev = pod
                .find_isolated_device(id)
                .ok_or_else(|| PodError::NotFound(format!("isolated device {}", id)))?;
            if !registry.supports(&dev.dev_type) {
                return Err(PodError::Validation(format!(
                    "device type {} is not supported by container, choose from {:?}",
                    dev.dev_type,
                    registry.types()
                )));
            }
            Ok(ContainerDeviceSpec::Isolated {
                device: dev.clone(),
                container_path: container_path.clone(),
            })
        }
    }
}

/// Resolve every device and mount of a container spec; all or nothing.
pub fn resolve_all(
    pod: &PodDesc,
    volumes_dir: &Path,
    spec: &ContainerSpec,
    registry: &DeviceManagerRegistry,
) -> Result<ResolvedContainer> {
    let devices = spec
        .devices
        .iter()
        .map(|d| resolve_device(pod, d, registry))
        .collect::<Result<Vec<_>>>()?;
    let mounts = spec
        .volume_mounts
        .iter()
        .map(|m| resolve_volume_mount(pod, volumes_dir, m))
        .collect::<Result<Vec<_>>>()?;
    Ok(ResolvedContainer { devices, mounts })
}

/// Validation-time entry: everything that can be checked without touching
/// the runtime.
pub fn validate_container_spec(
    pod: &PodDesc,
    volumes_dir: &Path,
    spec: &ContainerSpec,
    registry: &DeviceManagerRegistry,
) -> Result<ResolvedContainer> {
    if spec.image.is_empty() {
        return Err(PodError::Validation("container image is empty".to_string()));
    }
    for env in &spec.envs {
        if env.key.is_empty() {
            return Err(PodError::Validation("env key is empty".to_string()));
        }
    }
    resolve_all(pod, volumes_dir, spec, registry)
}
