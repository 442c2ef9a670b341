//! A3S Pod Core - Foundational Types
//!
//! Error taxonomy, agent configuration and the pod/container model shared by
//! the CRI client, the pod runtime and the CLI.

pub mod config;
pub mod container;
pub mod error;
pub mod pod;

// Re-export commonly used types
pub use config::AgentConfig;
pub use container::{
    ContainerCreateInput, ContainerDevice, ContainerSpec, ContainerStatus, ImagePullPolicy,
    KeyValue, MountPropagation, PullAuth, PullImageInput, VolumeMount, VolumeMountKind,
};
pub use error::{ErrorKind, PodError, Result, ResultExt};
pub use pod::{
    DnsConfig, IsolatedDevice, PodDesc, PodDisk, PodVolume, PortMapping, VolumeDisk,
    VolumeSource, META_CRI_CONFIG, META_CRI_ID,
};

/// A3S Pod version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
