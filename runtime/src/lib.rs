//! A3S Pod Runtime - host-side pod and container lifecycle.
//!
//! Turns pod descriptors into CRI sandboxes and containers: resolves volumes
//! and devices to host resources, keeps a per-pod container registry on disk,
//! drives the lifecycle state machine and dispatches orchestration requests as
//! background tasks.

#![allow(clippy::result_large_err)]

pub mod control;
pub mod device;
pub mod handlers;
pub mod host;
pub mod lifecycle;
pub mod loopdev;
pub mod manager;
pub mod mount;
pub mod pod;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod task;

#[cfg(test)]
mod fake;

// Re-export common types
pub use control::{ControlPlane, HttpControlPlane, NoopControlPlane};
pub use device::{ContainerDeviceManager, DeviceManagerRegistry};
pub use handlers::{ActionBody, ActionHandler};
pub use host::{HostOps, LoopDevice, SystemHostOps};
pub use lifecycle::{
    ContainerAction, ContainerEntity, ContainerLifecycle, ContainerRepository, CreatePodReport,
    MemoryRepository,
};
pub use loopdev::LoopAllocator;
pub use manager::PodManager;
pub use pod::{PodDeps, PodInstance, StartPodResult};
pub use registry::{ContainerRecord, ContainerRegistry};
pub use resolver::validate_container_spec;
pub use task::{Dispatched, TaskAck, TaskDispatcher, TaskReporter};

/// A3S Pod Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
