//! Entry points for orchestration requests.
//!
//! `POST /pods/{pod_id}/containers/{container_id}/{action}` maps onto
//! [`ActionHandler::handle_container_action`]. Requests are validated
//! synchronously, then the lifecycle operation runs in the background and the
//! caller gets a [`TaskAck`](crate::task::TaskAck) right away.

use std::sync::Arc;

use a3s_pod_core::container::PullAuth;
use a3s_pod_core::error::{PodError, Result};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{ContainerAction, ContainerLifecycle};
use crate::task::{Dispatched, TaskDispatcher};

/// Optional request body of a container action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionBody {
    /// Stop grace period in seconds
    pub timeout_secs: Option<i64>,
    /// Registry credentials for pull-image
    pub auth: Option<PullAuth>,
}

impl ActionBody {
    /// Parse a JSON body. An empty body means defaults.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }
}

pub struct ActionHandler {
    lifecycle: Arc<ContainerLifecycle>,
    dispatcher: TaskDispatcher,
}

impl ActionHandler {
    pub fn new(lifecycle: Arc<ContainerLifecycle>, dispatcher: TaskDispatcher) -> Self {
        Self {
            lifecycle,
            dispatcher,
        }
    }

    /// Validate and dispatch one container action.
    pub fn handle_container_action(
        &self,
        pod_id: &str,
        ctr_id: &str,
        action: &str,
        body: &[u8],
    ) -> Result<Dispatched> {
        let action: ContainerAction = action.parse()?;
        let body = ActionBody::parse(body)?;
        self.lifecycle.pods().get(pod_id)?;
        if ctr_id.is_empty() {
            return Err(PodError::Validation("container id is empty".to_string()));
        }

        tracing::info!(pod_id, container_id = ctr_id, action = %action, "Container action accepted");

        let lifecycle = self.lifecycle.clone();
        let pod_id = pod_id.to_string();
        let ctr_id = ctr_id.to_string();
        let name = action.as_str();
        let dispatched = match action {
            ContainerAction::Create => self.dispatcher.dispatch(name, async move {
                lifecycle.create(&pod_id, &ctr_id).await
            }),
            ContainerAction::Start => self.dispatcher.dispatch(name, async move {
                lifecycle.start(&pod_id, &ctr_id).await
            }),
            ContainerAction::Stop => self.dispatcher.dispatch(name, async move {
                lifecycle.stop(&pod_id, &ctr_id, body.timeout_secs).await
            }),
            ContainerAction::Delete => self.dispatcher.dispatch(name, async move {
                lifecycle.delete(&pod_id, &ctr_id).await
            }),
            ContainerAction::SyncStatus => self.dispatcher.dispatch(name, async move {
                lifecycle.sync_status(&pod_id, &ctr_id).await
            }),
            ContainerAction::PullImage => self.dispatcher.dispatch(name, async move {
                lifecycle.pull_image(&pod_id, &ctr_id, body.auth).await
            }),
        };
        Ok(dispatched)
    }

    /// Dispatch the pod-level create: sandbox plus every container.
    pub fn handle_create_pod(&self, pod_id: &str) -> Result<Dispatched> {
        self.lifecycle.pods().get(pod_id)?;
        tracing::info!(pod_id, "Pod create accepted");

        let lifecycle = self.lifecycle.clone();
        let pod_id = pod_id.to_string();
        Ok(self.dispatcher.dispatch("create-pod", async move {
            lifecycle.create_pod(&pod_id).await
        }))
    }
}
