//! In-process fake CRI runtime served over a Unix socket.
//!
//! Keeps sandboxes, containers and images in memory and records every call
//! so tests can assert on what went over the wire.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::RwLock;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use a3s_pod_cri::cri_api::image_service_server::{ImageService, ImageServiceServer};
use a3s_pod_cri::cri_api::runtime_service_server::{RuntimeService, RuntimeServiceServer};
use a3s_pod_cri::cri_api::*;

#[derive(Default)]
pub struct FakeState {
    pub sandboxes: RwLock<HashMap<String, PodSandbox>>,
    pub containers: RwLock<HashMap<String, Container>>,
    pub images: RwLock<HashSet<String>>,
    /// Images whose pull is rejected by the registry
    pub broken_images: RwLock<HashSet<String>>,
    pub pulls: RwLock<Vec<PullImageRequest>>,
    pub calls: RwLock<Vec<String>>,
    next_id: RwLock<u64>,
}

impl FakeState {
    async fn record(&self, call: &str) {
        self.calls.write().await.push(call.to_string());
    }

    async fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.write().await;
        *next += 1;
        format!("{}-{}", prefix, *next)
    }

    pub async fn call_count(&self, call: &str) -> usize {
        self.calls.read().await.iter().filter(|c| *c == call).count()
    }

    async fn set_container_state(&self, id: &str, state: ContainerState) -> Result<(), Status> {
        let mut containers = self.containers.write().await;
        let ctr = containers
            .get_mut(id)
            .ok_or_else(|| Status::not_found(format!("Container not found: {}", id)))?;
        ctr.state = state as i32;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeRuntime {
    state: Arc<FakeState>,
}

/// Serve a fake runtime on `<dir>/cri.sock`; returns the endpoint and state.
pub async fn spawn(dir: &Path) -> (String, Arc<FakeState>) {
    let socket = dir.join("cri.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let incoming = UnixListenerStream::new(listener);
    let state = Arc::new(FakeState::default());
    let runtime = FakeRuntime {
        state: state.clone(),
    };

    tokio::spawn(async move {
        Server::builder()
            .add_service(RuntimeServiceServer::new(runtime.clone()))
            .add_service(ImageServiceServer::new(runtime))
            .serve_with_incoming(incoming)
            .await
    });

    (format!("unix://{}", socket.display()), state)
}

#[tonic::async_trait]
impl RuntimeService for FakeRuntime {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        self.state.record("Version").await;
        Ok(Response::new(VersionResponse {
            version: "0.1.0".to_string(),
            runtime_name: "fake".to_string(),
            runtime_version: "1.0.0".to_string(),
            runtime_api_version: "v1".to_string(),
        }))
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        self.state.record("RunPodSandbox").await;
        let req = request.into_inner();
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("sandbox config required"))?;
        let metadata = config
            .metadata
            .clone()
            .ok_or_else(|| Status::invalid_argument("sandbox metadata required"))?;

        let id = self.state.next_id("sb").await;
        let sandbox = PodSandbox {
            id: id.clone(),
            metadata: Some(metadata),
            state: PodSandboxState::SandboxReady as i32,
            labels: config.labels,
            annotations: config.annotations,
            runtime_handler: req.runtime_handler,
            ..Default::default()
        };
        self.state.sandboxes.write().await.insert(id.clone(), sandbox);
        Ok(Response::new(RunPodSandboxResponse { pod_sandbox_id: id }))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        self.state.record("StopPodSandbox").await;
        let id = request.into_inner().pod_sandbox_id;
        let mut sandboxes = self.state.sandboxes.write().await;
        let sandbox = sandboxes
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("Sandbox not found: {}", id)))?;
        sandbox.state = PodSandboxState::SandboxNotready as i32;
        Ok(Response::new(StopPodSandboxResponse {}))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        self.state.record("RemovePodSandbox").await;
        let id = request.into_inner().pod_sandbox_id;
        self.state
            .sandboxes
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| Status::not_found(format!("Sandbox not found: {}", id)))?;
        self.state
            .containers
            .write()
            .await
            .retain(|_, c| c.pod_sandbox_id != id);
        Ok(Response::new(RemovePodSandboxResponse {}))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        self.state.record("ListPodSandbox").await;
        let filter = request.into_inner().filter.unwrap_or_default();
        let items = self
            .state
            .sandboxes
            .read()
            .await
            .values()
            .filter(|sb| filter.id.is_empty() || sb.id == filter.id)
            .filter(|sb| filter.state.as_ref().map_or(true, |s| s.state == sb.state))
            .filter(|sb| {
                filter
                    .label_selector
                    .iter()
                    .all(|(k, v)| sb.labels.get(k) == Some(v))
            })
            .cloned()
            .collect();
        Ok(Response::new(ListPodSandboxResponse { items }))
    }

    async fn create_container(
        &self,
        request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        self.state.record("CreateContainer").await;
        let req = request.into_inner();
        if !self
            .state
            .sandboxes
            .read()
            .await
            .contains_key(&req.pod_sandbox_id)
        {
            return Err(Status::not_found(format!(
                "Sandbox not found: {}",
                req.pod_sandbox_id
            )));
        }
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("container config required"))?;

        let id = self.state.next_id("ctr").await;
        let container = Container {
            id: id.clone(),
            pod_sandbox_id: req.pod_sandbox_id,
            metadata: config.metadata,
            image: config.image,
            state: ContainerState::ContainerCreated as i32,
            labels: config.labels,
            annotations: config.annotations,
            ..Default::default()
        };
        self.state.containers.write().await.insert(id.clone(), container);
        Ok(Response::new(CreateContainerResponse { container_id: id }))
    }

    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        self.state.record("StartContainer").await;
        let id = request.into_inner().container_id;
        self.state
            .set_container_state(&id, ContainerState::ContainerRunning)
            .await?;
        Ok(Response::new(StartContainerResponse {}))
    }

    async fn stop_container(
        &self,
        request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        self.state.record("StopContainer").await;
        let id = request.into_inner().container_id;
        self.state
            .set_container_state(&id, ContainerState::ContainerExited)
            .await?;
        Ok(Response::new(StopContainerResponse {}))
    }

    async fn remove_container(
        &self,
        request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        self.state.record("RemoveContainer").await;
        let id = request.into_inner().container_id;
        self.state
            .containers
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| Status::not_found(format!("Container not found: {}", id)))?;
        Ok(Response::new(RemoveContainerResponse {}))
    }

    async fn list_containers(
        &self,
        request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        self.state.record("ListContainers").await;
        let filter = request.into_inner().filter.unwrap_or_default();
        let containers = self
            .state
            .containers
            .read()
            .await
            .values()
            .filter(|c| filter.id.is_empty() || c.id == filter.id)
            .filter(|c| filter.pod_sandbox_id.is_empty() || c.pod_sandbox_id == filter.pod_sandbox_id)
            .filter(|c| filter.state.as_ref().map_or(true, |s| s.state == c.state))
            .cloned()
            .collect();
        Ok(Response::new(ListContainersResponse { containers }))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        self.state.record("ContainerStatus").await;
        let id = request.into_inner().container_id;
        let containers = self.state.containers.read().await;
        let ctr = containers
            .get(&id)
            .ok_or_else(|| Status::not_found(format!("Container not found: {}", id)))?;
        Ok(Response::new(ContainerStatusResponse {
            status: Some(ContainerStatus {
                id: ctr.id.clone(),
                metadata: ctr.metadata.clone(),
                state: ctr.state,
                image: ctr.image.clone(),
                ..Default::default()
            }),
            info: HashMap::new(),
        }))
    }
}

#[tonic::async_trait]
impl ImageService for FakeRuntime {
    async fn list_images(
        &self,
        _request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        self.state.record("ListImages").await;
        let images = self
            .state
            .images
            .read()
            .await
            .iter()
            .map(|name| Image {
                id: format!("sha256:{}", name),
                repo_tags: vec![name.clone()],
                ..Default::default()
            })
            .collect();
        Ok(Response::new(ListImagesResponse { images }))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        self.state.record("ImageStatus").await;
        let name = request.into_inner().image.unwrap_or_default().image;
        let image = if self.state.images.read().await.contains(&name) {
            Some(Image {
                id: format!("sha256:{}", name),
                repo_tags: vec![name],
                ..Default::default()
            })
        } else {
            None
        };
        Ok(Response::new(ImageStatusResponse {
            image,
            info: HashMap::new(),
        }))
    }

    async fn pull_image(
        &self,
        request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        self.state.record("PullImage").await;
        let req = request.into_inner();
        self.state.pulls.write().await.push(req.clone());
        let name = req.image.unwrap_or_default().image;
        if self.state.broken_images.read().await.contains(&name) {
            return Err(Status::not_found(format!("manifest unknown: {}", name)));
        }
        self.state.images.write().await.insert(name.clone());
        Ok(Response::new(PullImageResponse {
            image_ref: format!("sha256:{}", name),
        }))
    }

    async fn remove_image(
        &self,
        request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        self.state.record("RemoveImage").await;
        let name = request.into_inner().image.unwrap_or_default().image;
        self.state.images.write().await.remove(&name);
        Ok(Response::new(RemoveImageResponse {}))
    }
}
