//! Filesystem mounts of disk-backed volumes.
//!
//! A disk carrying a filesystem is loop-attached and mounted once under
//! `<home>/volumes/<disk_id>`; every container using the volume bind-mounts
//! that directory. The mount lives until the pod is cleaned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pod_core::error::{PodError, Result};
use tokio::sync::Mutex;

use crate::host::HostOps;
use crate::loopdev::LoopAllocator;
use crate::resolver::HostMountSpec;

pub struct VolumeMounter {
    host: Arc<dyn HostOps>,
    loops: Arc<LoopAllocator>,
    mounted: Mutex<HashSet<PathBuf>>,
}

/// Loop allocator holder of a volume mount.
fn volume_holder(pod_id: &str, disk_id: &str) -> String {
    format!("{}/volume/{}", pod_id, disk_id)
}

impl VolumeMounter {
    pub fn new(host: Arc<dyn HostOps>, loops: Arc<LoopAllocator>) -> Self {
        Self {
            host,
            loops,
            mounted: Mutex::new(HashSet::new()),
        }
    }

    /// Mount the disk behind `spec` at its mount point unless it already is.
    pub async fn ensure_mounted(&self, pod_id: &str, spec: &HostMountSpec) -> Result<()> {
        if spec.raw {
            return Err(PodError::Validation(format!(
                "disk {} is attached raw and has no mount point",
                spec.disk_id
            )));
        }
        let fs = spec
            .fs
            .as_deref()
            .filter(|fs| !fs.is_empty())
            .ok_or_else(|| {
                PodError::Validation(format!("disk {} has no filesystem to mount", spec.disk_id))
            })?;

        let mut mounted = self.mounted.lock().await;
        if mounted.contains(&spec.host_path) {
            return Ok(());
        }
        // Survives agent restarts: the kernel still has the mount.
        if self.host.is_mounted(&spec.host_path) {
            tracing::info!(
                pod_id,
                disk_id = %spec.disk_id,
                target = %spec.host_path.display(),
                "Volume already mounted"
            );
            mounted.insert(spec.host_path.clone());
            return Ok(());
        }

        let holder = volume_holder(pod_id, &spec.disk_id);
        let device = self.loops.acquire(&spec.disk_path, &holder).await?;
        if let Err(e) = self.host.mount(&device, &spec.host_path, fs).await {
            if let Err(release_err) = self.loops.release(&holder).await {
                tracing::warn!(holder = %holder, error = %release_err, "Failed to release loop device");
            }
            return Err(e);
        }
        tracing::info!(
            pod_id,
            disk_id = %spec.disk_id,
            device = %device,
            target = %spec.host_path.display(),
            "Mounted volume"
        );
        mounted.insert(spec.host_path.clone());
        Ok(())
    }

    /// Unmount every volume mount point under `volumes_dir` and release the
    /// loop devices behind them. Keeps going on failure, returns the first
    /// error.
    pub async fn unmount_all(&self, pod_id: &str, volumes_dir: &Path) -> Result<()> {
        let mut mounted = self.mounted.lock().await;

        let mut targets: HashSet<PathBuf> = mounted.clone();
        if let Ok(entries) = std::fs::read_dir(volumes_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if self.host.is_mounted(&path) {
                    targets.insert(path);
                }
            }
        }

        let mut first_err = None;
        for target in targets {
            if let Err(e) = self.host.unmount(&target).await {
                tracing::warn!(pod_id, target = %target.display(), error = %e, "Failed to unmount volume");
                first_err.get_or_insert(e);
                continue;
            }
            mounted.remove(&target);

            let disk_id = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Err(e) = self.loops.release(&volume_holder(pod_id, &disk_id)).await {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().await.contains(target)
    }
}
