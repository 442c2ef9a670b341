//! gRPC client for a CRI runtime (containerd, CRI-O).
//!
//! Connects over a Unix domain socket (`unix:///run/containerd/containerd.sock`)
//! or plain HTTP/2, and bounds every call with a timeout. No local state is
//! kept beyond the channel.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use a3s_pod_core::error::{PodError, Result};
use async_trait::async_trait;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::cri_api::image_service_client::ImageServiceClient;
use crate::cri_api::runtime_service_client::RuntimeServiceClient;
use crate::cri_api::{
    AuthConfig, Container, ContainerConfig, ContainerStatusRequest, CreateContainerRequest,
    Image, ImageFilter, ImageSpec, ImageStatusRequest, ListContainersRequest, ListImagesRequest,
    ListPodSandboxRequest, PodSandbox, PodSandboxConfig, PullImageRequest,
    RemoveContainerRequest, RemoveImageRequest, RemovePodSandboxRequest, RunPodSandboxRequest,
    StartContainerRequest, StopContainerRequest, StopPodSandboxRequest, VersionRequest,
    VersionResponse,
};
use crate::error::{require_id, status_to_pod_error};
use crate::options::{ListContainerOptions, ListPodOptions};
use crate::service::RuntimeClient;
use crate::types::ContainerStatusInfo;

/// Largest response the client accepts (image lists can be big).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// CRI API version sent with `Version`.
const CRI_API_VERSION: &str = "v1";

/// Default bound for image pulls, which outlast ordinary calls.
const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// CRI transport client.
#[derive(Clone)]
pub struct CriClient {
    endpoint: String,
    timeout: Duration,
    pull_timeout: Duration,
    runtime: RuntimeServiceClient<Channel>,
    images: ImageServiceClient<Channel>,
}

impl CriClient {
    /// Connect to a runtime endpoint within `timeout`.
    ///
    /// `timeout` also becomes the per-call bound for every later call.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let channel = match tokio::time::timeout(timeout, open_channel(endpoint, timeout)).await
        {
            Ok(channel) => channel?,
            Err(_) => {
                return Err(PodError::Connect {
                    endpoint: endpoint.to_string(),
                    message: format!("timed out after {:?}", timeout),
                })
            }
        };
        tracing::info!(endpoint, "Connected to CRI runtime");
        Ok(Self::from_channel(endpoint, channel, timeout))
    }

    /// Wrap an already established channel.
    pub fn from_channel(endpoint: impl Into<String>, channel: Channel, timeout: Duration) -> Self {
        let runtime =
            RuntimeServiceClient::new(channel.clone()).max_decoding_message_size(MAX_MESSAGE_SIZE);
        let images = ImageServiceClient::new(channel).max_decoding_message_size(MAX_MESSAGE_SIZE);
        Self {
            endpoint: endpoint.into(),
            timeout,
            pull_timeout: DEFAULT_PULL_TIMEOUT.max(timeout),
            runtime,
            images,
        }
    }

    /// Override the bound used for image pulls.
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one call with a deadline, mapping failures to `PodError`.
    async fn call<T, F>(&self, operation: &str, target: &str, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp.into_inner()),
            Ok(Err(status)) => Err(status_to_pod_error(operation, target, status)),
            Err(_) => Err(PodError::Timeout(format!(
                "CRI {} {} after {:?}",
                operation, target, timeout
            ))),
        }
    }

    fn request<T>(&self, message: T, timeout: Duration) -> tonic::Request<T> {
        let mut req = tonic::Request::new(message);
        req.set_timeout(timeout);
        req
    }
}

async fn open_channel(endpoint: &str, timeout: Duration) -> Result<Channel> {
    let connect_err = |message: String| PodError::Connect {
        endpoint: endpoint.to_string(),
        message,
    };

    if let Some(path) = endpoint.strip_prefix("unix://") {
        let path = PathBuf::from(path);
        // The URI is required by tonic but ignored by the connector.
        return Endpoint::try_from("http://[::]:50051")
            .map_err(|e| connect_err(e.to_string()))?
            .connect_timeout(timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                UnixStream::connect(path.clone())
            }))
            .await
            .map_err(|e| connect_err(e.to_string()));
    }

    Endpoint::from_shared(endpoint.to_string())
        .map_err(|e| connect_err(e.to_string()))?
        .connect_timeout(timeout)
        .connect()
        .await
        .map_err(|e| connect_err(e.to_string()))
}

#[async_trait]
impl RuntimeClient for CriClient {
    async fn version(&self) -> Result<VersionResponse> {
        let mut client = self.runtime.clone();
        let req = self.request(
            VersionRequest {
                version: CRI_API_VERSION.to_string(),
            },
            self.timeout,
        );
        self.call("Version", "", self.timeout, client.version(req))
            .await
    }

    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String> {
        let message = RunPodSandboxRequest {
            config: Some(config.clone()),
            runtime_handler: runtime_handler.to_string(),
        };
        let name = config
            .metadata
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_default();
        tracing::debug!(request = ?message, "RunPodSandbox");

        let mut client = self.runtime.clone();
        let req = self.request(message, self.timeout);
        let resp = self
            .call("RunPodSandbox", &name, self.timeout, client.run_pod_sandbox(req))
            .await?;
        tracing::info!(sandbox_id = %resp.pod_sandbox_id, name = %name, "CRI RunPodSandbox");
        Ok(resp.pod_sandbox_id)
    }

    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<()> {
        require_id("StopPodSandbox", sandbox_id)?;
        let mut client = self.runtime.clone();
        let req = self.request(
            StopPodSandboxRequest {
                pod_sandbox_id: sandbox_id.to_string(),
            },
            self.timeout,
        );
        self.call("StopPodSandbox", sandbox_id, self.timeout, client.stop_pod_sandbox(req))
            .await?;
        tracing::info!(sandbox_id, "CRI StopPodSandbox");
        Ok(())
    }

    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<()> {
        require_id("RemovePodSandbox", sandbox_id)?;
        let mut client = self.runtime.clone();
        let req = self.request(
            RemovePodSandboxRequest {
                pod_sandbox_id: sandbox_id.to_string(),
            },
            self.timeout,
        );
        self.call(
            "RemovePodSandbox",
            sandbox_id,
            self.timeout,
            client.remove_pod_sandbox(req),
        )
        .await?;
        tracing::info!(sandbox_id, "CRI RemovePodSandbox");
        Ok(())
    }

    async fn list_pods(&self, opts: &ListPodOptions) -> Result<Vec<PodSandbox>> {
        let mut client = self.runtime.clone();
        let req = self.request(
            ListPodSandboxRequest {
                filter: Some(opts.to_filter()),
            },
            self.timeout,
        );
        let resp = self
            .call("ListPodSandbox", "", self.timeout, client.list_pod_sandbox(req))
            .await?;
        opts.filter(resp.items)
    }

    async fn create_container(
        &self,
        sandbox_id: &str,
        sandbox_config: &PodSandboxConfig,
        config: &ContainerConfig,
        with_pull: bool,
    ) -> Result<String> {
        require_id("CreateContainer", sandbox_id)?;

        let mut config = config.clone();
        let image = config.image.get_or_insert_with(ImageSpec::default);
        if image.image.is_empty() {
            return Err(PodError::Validation(
                "CreateContainer: image can't be empty".to_string(),
            ));
        }
        if image.user_specified_image.is_empty() {
            image.user_specified_image = image.image.clone();
        }
        let image_name = image.image.clone();
        let annotations = image.annotations.clone();

        if with_pull {
            let image_ref = self
                .pull_image(&image_name, None, Some(sandbox_config), annotations)
                .await
                .map_err(|e| PodError::Context {
                    context: format!("pull image {} before CreateContainer", image_name),
                    source: Box::new(e),
                })?;
            tracing::info!(image = %image_name, image_ref = %image_ref, "Pulled image");
        }

        let message = CreateContainerRequest {
            pod_sandbox_id: sandbox_id.to_string(),
            config: Some(config),
            sandbox_config: Some(sandbox_config.clone()),
        };
        tracing::debug!(request = ?message, "CreateContainer");

        let mut client = self.runtime.clone();
        let req = self.request(message, self.timeout);
        let resp = self
            .call("CreateContainer", sandbox_id, self.timeout, client.create_container(req))
            .await?;
        tracing::info!(
            sandbox_id,
            container_id = %resp.container_id,
            image = %image_name,
            "CRI CreateContainer"
        );
        Ok(resp.container_id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        require_id("StartContainer", container_id)?;
        let mut client = self.runtime.clone();
        let req = self.request(
            StartContainerRequest {
                container_id: container_id.to_string(),
            },
            self.timeout,
        );
        self.call("StartContainer", container_id, self.timeout, client.start_container(req))
            .await?;
        tracing::info!(container_id, "CRI StartContainer");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: i64) -> Result<()> {
        require_id("StopContainer", container_id)?;
        // The runtime may wait out the grace period before answering.
        let bound = self.timeout + Duration::from_secs(timeout_secs.max(0) as u64);
        let mut client = self.runtime.clone();
        let req = self.request(
            StopContainerRequest {
                container_id: container_id.to_string(),
                timeout: timeout_secs,
            },
            bound,
        );
        self.call("StopContainer", container_id, bound, client.stop_container(req))
            .await?;
        tracing::info!(container_id, timeout_secs, "CRI StopContainer");
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        require_id("RemoveContainer", container_id)?;
        let mut client = self.runtime.clone();
        let req = self.request(
            RemoveContainerRequest {
                container_id: container_id.to_string(),
            },
            self.timeout,
        );
        self.call("RemoveContainer", container_id, self.timeout, client.remove_container(req))
            .await?;
        tracing::info!(container_id, "CRI RemoveContainer");
        Ok(())
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatusInfo> {
        require_id("ContainerStatus", container_id)?;
        let mut client = self.runtime.clone();
        let req = self.request(
            ContainerStatusRequest {
                container_id: container_id.to_string(),
                verbose: false,
            },
            self.timeout,
        );
        let resp = self
            .call("ContainerStatus", container_id, self.timeout, client.container_status(req))
            .await?;
        let status = resp.status.ok_or_else(|| {
            PodError::NotFound(format!("status of container {}", container_id))
        })?;
        Ok(ContainerStatusInfo::from(status))
    }

    async fn list_containers(&self, opts: &ListContainerOptions) -> Result<Vec<Container>> {
        let mut client = self.runtime.clone();
        let req = self.request(
            ListContainersRequest {
                filter: Some(opts.to_filter()),
            },
            self.timeout,
        );
        let resp = self
            .call("ListContainers", "", self.timeout, client.list_containers(req))
            .await?;
        opts.filter(resp.containers)
    }

    async fn list_images(&self, filter: Option<ImageFilter>) -> Result<Vec<Image>> {
        let mut client = self.images.clone();
        let req = self.request(ListImagesRequest { filter }, self.timeout);
        let resp = self
            .call("ListImages", "", self.timeout, client.list_images(req))
            .await?;
        Ok(resp.images)
    }

    async fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>> {
        let mut client = self.images.clone();
        let req = self.request(
            ImageStatusRequest {
                image: Some(image.clone()),
                verbose: false,
            },
            self.timeout,
        );
        let resp = self
            .call("ImageStatus", &image.image, self.timeout, client.image_status(req))
            .await?;
        // Absent images come back as an empty message rather than an error.
        Ok(resp.image.filter(|img| !img.id.is_empty()))
    }

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<AuthConfig>,
        sandbox_config: Option<&PodSandboxConfig>,
        annotations: HashMap<String, String>,
    ) -> Result<String> {
        if image.is_empty() {
            return Err(PodError::Validation(
                "PullImage: image can't be empty".to_string(),
            ));
        }
        let message = PullImageRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                annotations,
                ..Default::default()
            }),
            auth,
            sandbox_config: sandbox_config.cloned(),
        };
        tracing::debug!(image, with_auth = message.auth.is_some(), "PullImage");

        let mut client = self.images.clone();
        let req = self.request(message, self.pull_timeout);
        let resp = self
            .call("PullImage", image, self.pull_timeout, client.pull_image(req))
            .await?;
        tracing::info!(image, image_ref = %resp.image_ref, "CRI PullImage");
        Ok(resp.image_ref)
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        require_id("RemoveImage", image)?;
        let mut client = self.images.clone();
        let req = self.request(
            RemoveImageRequest {
                image: Some(ImageSpec {
                    image: image.to_string(),
                    ..Default::default()
                }),
            },
            self.timeout,
        );
        self.call("RemoveImage", image, self.timeout, client.remove_image(req))
            .await?;
        tracing::info!(image, "CRI RemoveImage");
        Ok(())
    }
}
