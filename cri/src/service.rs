//! The runtime-facing contract of the transport client.
//!
//! Everything above the transport (pod instances, lifecycle tasks, the CLI)
//! talks to the container runtime through [`RuntimeClient`], so tests can
//! substitute an in-memory runtime.

use std::collections::HashMap;

use a3s_pod_core::error::{PodError, Result};
use async_trait::async_trait;

use crate::cri_api::{
    AuthConfig, Container, ContainerConfig, Image, ImageFilter, ImageSpec, PodSandbox,
    PodSandboxConfig, VersionResponse,
};
use crate::options::{ListContainerOptions, ListPodOptions};
use crate::types::{ContainerStatusInfo, RunContainersResponse};

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn version(&self) -> Result<VersionResponse>;

    /// Create a sandbox and return its id.
    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String>;

    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<()>;

    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<()>;

    async fn list_pods(&self, opts: &ListPodOptions) -> Result<Vec<PodSandbox>>;

    /// Create a container inside a sandbox. With `with_pull` the image is
    /// pulled first and a pull failure aborts the creation.
    async fn create_container(
        &self,
        sandbox_id: &str,
        sandbox_config: &PodSandboxConfig,
        config: &ContainerConfig,
        with_pull: bool,
    ) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop with a grace period in seconds; 0 kills immediately.
    async fn stop_container(&self, container_id: &str, timeout_secs: i64) -> Result<()>;

    async fn remove_container(&self, container_id: &str) -> Result<()>;

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatusInfo>;

    async fn list_containers(&self, opts: &ListContainerOptions) -> Result<Vec<Container>>;

    async fn list_images(&self, filter: Option<ImageFilter>) -> Result<Vec<Image>>;

    /// `None` when the image is not present on the node.
    async fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>>;

    /// Pull an image and return the runtime's image reference.
    async fn pull_image(
        &self,
        image: &str,
        auth: Option<AuthConfig>,
        sandbox_config: Option<&PodSandboxConfig>,
        annotations: HashMap<String, String>,
    ) -> Result<String>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Run a sandbox, then create (with pull) and start each container in
    /// order. Stops at the first failure; whatever was created stays.
    async fn run_containers(
        &self,
        pod_config: &PodSandboxConfig,
        containers: &[ContainerConfig],
        runtime_handler: &str,
    ) -> Result<RunContainersResponse> {
        let pod_id = self
            .run_pod_sandbox(pod_config, runtime_handler)
            .await
            .map_err(|e| partial("RunPodSandbox".to_string(), e))?;

        let mut resp = RunContainersResponse {
            pod_id,
            container_ids: Vec::with_capacity(containers.len()),
        };
        for (idx, ctr) in containers.iter().enumerate() {
            let ctr_id = self
                .create_container(&resp.pod_id, pod_config, ctr, true)
                .await
                .map_err(|e| partial(format!("CreateContainer {}", idx), e))?;
            self.start_container(&ctr_id)
                .await
                .map_err(|e| partial(format!("StartContainer {}", idx), e))?;
            resp.container_ids.push(ctr_id);
        }
        Ok(resp)
    }
}

fn partial(step: String, source: PodError) -> PodError {
    PodError::PartialFailure {
        step,
        source: Box::new(source),
    }
}
