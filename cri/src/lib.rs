//! A3S Pod CRI - Container Runtime Interface transport client.
//!
//! The only crate that talks to the container runtime. Callers depend on the
//! [`RuntimeClient`] trait; [`CriClient`] implements it over gRPC.

pub mod client;
pub mod error;
pub mod options;
pub mod service;
pub mod types;

/// Generated CRI v1 protobuf types.
pub mod cri_api {
    tonic::include_proto!("runtime.v1");
}

pub use client::{CriClient, MAX_MESSAGE_SIZE};
pub use options::{ListContainerOptions, ListPodOptions};
pub use service::RuntimeClient;
pub use types::{ContainerStatusInfo, CriContainerState, CriSandboxState, RunContainersResponse};
