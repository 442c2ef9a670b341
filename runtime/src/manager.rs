//! Pod manager: owns every pod instance on this host.

use std::sync::Arc;

use a3s_pod_core::error::{PodError, Result};
use a3s_pod_core::pod::{normalize_volume_disks, PodDesc};
use dashmap::DashMap;

use crate::pod::{PodDeps, PodInstance, DESC_FILE};

pub struct PodManager {
    deps: PodDeps,
    pods: DashMap<String, Arc<PodInstance>>,
}

impl PodManager {
    pub fn new(deps: PodDeps) -> Self {
        Self {
            deps,
            pods: DashMap::new(),
        }
    }

    pub fn deps(&self) -> &PodDeps {
        &self.deps
    }

    /// Load every pod found under the servers path. Pods whose descriptor
    /// cannot be read are skipped with a warning.
    pub fn load_all(&self) -> Result<usize> {
        let root = &self.deps.config.servers_path;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(PodError::Other(format!(
                    "failed to read servers path {}: {}",
                    root.display(),
                    e
                )))
            }
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let home = entry.path();
            if !home.join(DESC_FILE).exists() {
                continue;
            }
            match PodInstance::load(&home, self.deps.clone()) {
                Ok(pod) => {
                    self.pods.insert(pod.id().to_string(), Arc::new(pod));
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(home = %home.display(), error = %e, "Skipping unreadable pod");
                }
            }
        }
        tracing::info!(count = loaded, "Loaded pods");
        Ok(loaded)
    }

    /// Register a new pod. Volume disk references are normalized to ids
    /// first.
    pub fn create_pod(&self, mut desc: PodDesc) -> Result<Arc<PodInstance>> {
        desc.validate()?;
        normalize_volume_disks(&desc.disks, &mut desc.volumes)?;

        if self.pods.contains_key(&desc.id) {
            return Err(PodError::Validation(format!(
                "pod {} already exists",
                desc.id
            )));
        }
        let pod = Arc::new(PodInstance::create(desc, self.deps.clone())?);
        self.pods.insert(pod.id().to_string(), pod.clone());
        Ok(pod)
    }

    pub fn get(&self, pod_id: &str) -> Result<Arc<PodInstance>> {
        self.pods
            .get(pod_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| PodError::NotFound(format!("pod {}", pod_id)))
    }

    /// All pods, ordered by id.
    pub fn list(&self) -> Vec<Arc<PodInstance>> {
        let mut pods: Vec<_> = self.pods.iter().map(|p| p.value().clone()).collect();
        pods.sort_by(|a, b| a.id().cmp(b.id()));
        pods
    }

    /// Clean a pod and forget it.
    pub async fn clean_pod(&self, pod_id: &str) -> Result<()> {
        let pod = self.get(pod_id)?;
        pod.clean_pod().await?;
        self.pods.remove(pod_id);
        Ok(())
    }
}
