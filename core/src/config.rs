use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PodError, Result};

/// Default CRI endpoint (containerd's CRI plugin socket).
pub const DEFAULT_CRI_ENDPOINT: &str = "unix:///run/containerd/containerd.sock";

/// Pod agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// CRI runtime endpoint (`unix:///path` or `http://host:port`)
    pub cri_endpoint: String,

    /// Per-call CRI timeout in seconds (also bounds connect)
    pub cri_timeout_secs: u64,

    /// Bound on a single image pull in seconds
    pub image_pull_timeout_secs: u64,

    /// Root under which every pod gets a home directory
    pub servers_path: PathBuf,

    /// CRI runtime handler passed to RunPodSandbox (empty = runtime default)
    pub runtime_handler: String,

    /// Helper that creates binder device nodes from the binder control device
    pub binder_helper: PathBuf,

    /// Binder control device handed to the helper
    pub binder_control_path: PathBuf,

    /// Base URL of the control plane; metadata updates are skipped when unset
    pub control_plane_url: Option<String>,

    /// Chain start after a successful container create
    pub auto_start: bool,

    /// Grace period used when stop requests carry no timeout
    pub stop_timeout_secs: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cri_endpoint: DEFAULT_CRI_ENDPOINT.to_string(),
            cri_timeout_secs: 5,
            image_pull_timeout_secs: 600,
            servers_path: PathBuf::from("/opt/a3s/pods"),
            runtime_handler: String::new(),
            binder_helper: PathBuf::from("/opt/a3s/bin/binder_device"),
            binder_control_path: PathBuf::from("/dev/binder-control"),
            control_plane_url: None,
            auto_start: true,
            stop_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PodError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&data)
            .map_err(|e| PodError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`~/.a3s/pod.yaml`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".a3s"))
            .unwrap_or_else(|| PathBuf::from(".a3s"))
            .join("pod.yaml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.cri_endpoint.is_empty() {
            return Err(PodError::Config("cri_endpoint is empty".to_string()));
        }
        if !self.cri_endpoint.starts_with("unix://")
            && !self.cri_endpoint.starts_with("http://")
            && !self.cri_endpoint.starts_with("https://")
        {
            return Err(PodError::Config(format!(
                "unsupported cri_endpoint scheme: {}",
                self.cri_endpoint
            )));
        }
        if self.cri_timeout_secs == 0 {
            return Err(PodError::Config("cri_timeout_secs must be > 0".to_string()));
        }
        if self.image_pull_timeout_secs == 0 {
            return Err(PodError::Config(
                "image_pull_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.stop_timeout_secs < 0 {
            return Err(PodError::Config(
                "stop_timeout_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cri_timeout(&self) -> Duration {
        Duration::from_secs(self.cri_timeout_secs)
    }

    pub fn image_pull_timeout(&self) -> Duration {
        Duration::from_secs(self.image_pull_timeout_secs)
    }

    /// Home directory of one pod.
    pub fn pod_home(&self, pod_id: &str) -> PathBuf {
        self.servers_path.join(pod_id)
    }
}
