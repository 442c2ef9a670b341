//! Upstream control plane.
//!
//! The authoritative pod and container records live upstream; the agent only
//! writes back the CRI ids it learned, as key/value metadata.

use std::collections::HashMap;
use std::time::Duration;

use a3s_pod_core::error::{PodError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn set_pod_metadata(&self, pod_id: &str, metadata: &HashMap<String, String>)
        -> Result<()>;

    async fn set_container_metadata(
        &self,
        container_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
}

/// Control plane reached over HTTP: `PATCH {base}/pods/{id}/metadata` and
/// `PATCH {base}/containers/{id}/metadata` with a JSON object body.
pub struct HttpControlPlane {
    http: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PodError::ControlPlane(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn metadata_url(&self, kind: &str, id: &str) -> String {
        format!("{}/{}/{}/metadata", self.base_url, kind, id)
    }

    async fn patch(&self, url: String, metadata: &HashMap<String, String>) -> Result<()> {
        tracing::debug!(url = %url, keys = metadata.len(), "Updating control plane metadata");
        let response = self
            .http
            .patch(&url)
            .json(metadata)
            .send()
            .await
            .map_err(|e| PodError::ControlPlane(format!("PATCH {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PodError::ControlPlane(format!(
                "PATCH {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn set_pod_metadata(
        &self,
        pod_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.patch(self.metadata_url("pods", pod_id), metadata).await
    }

    async fn set_container_metadata(
        &self,
        container_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.patch(self.metadata_url("containers", container_id), metadata)
            .await
    }
}

/// Used when no control plane is configured; updates are dropped.
#[derive(Debug, Default, Clone)]
pub struct NoopControlPlane;

#[async_trait]
impl ControlPlane for NoopControlPlane {
    async fn set_pod_metadata(
        &self,
        pod_id: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        tracing::debug!(pod_id, "No control plane configured, skipping pod metadata update");
        Ok(())
    }

    async fn set_container_metadata(
        &self,
        container_id: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        tracing::debug!(
            container_id,
            "No control plane configured, skipping container metadata update"
        );
        Ok(())
    }
}
