//! Filter options for the CRI list calls.
//!
//! Id, state, pod id and labels go to the runtime as CRI filters. Name and
//! namespace patterns and the image reference have no CRI filter field and
//! are matched client-side.

use std::collections::HashMap;

use a3s_pod_core::error::{PodError, Result};
use regex::Regex;

use crate::cri_api::{
    Container, ContainerFilter, ContainerStateValue, PodSandbox, PodSandboxFilter,
    PodSandboxStateValue,
};
use crate::types::{CriContainerState, CriSandboxState};

#[derive(Debug, Clone, Default)]
pub struct ListPodOptions {
    pub id: String,
    pub name_regexp: String,
    pub namespace_regexp: String,
    pub state: Option<CriSandboxState>,
    pub labels: HashMap<String, String>,
}

impl ListPodOptions {
    pub fn to_filter(&self) -> PodSandboxFilter {
        PodSandboxFilter {
            id: self.id.clone(),
            state: self.state.map(|s| PodSandboxStateValue {
                state: s.to_proto() as i32,
            }),
            label_selector: self.labels.clone(),
        }
    }

    /// Apply the client-side criteria to what the runtime returned.
    pub fn filter(&self, items: Vec<PodSandbox>) -> Result<Vec<PodSandbox>> {
        let name = compile("name", &self.name_regexp)?;
        let namespace = compile("namespace", &self.namespace_regexp)?;
        Ok(items
            .into_iter()
            .filter(|pod| {
                let meta = pod.metadata.clone().unwrap_or_default();
                name.as_ref().map_or(true, |re| re.is_match(&meta.name))
                    && namespace
                        .as_ref()
                        .map_or(true, |re| re.is_match(&meta.namespace))
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListContainerOptions {
    pub id: String,
    pub pod_id: String,
    pub name_regexp: String,
    pub state: Option<CriContainerState>,
    pub labels: HashMap<String, String>,
    pub image: String,
}

impl ListContainerOptions {
    pub fn to_filter(&self) -> ContainerFilter {
        ContainerFilter {
            id: self.id.clone(),
            state: self.state.map(|s| ContainerStateValue {
                state: s.to_proto() as i32,
            }),
            pod_sandbox_id: self.pod_id.clone(),
            label_selector: self.labels.clone(),
        }
    }

    pub fn filter(&self, items: Vec<Container>) -> Result<Vec<Container>> {
        let name = compile("name", &self.name_regexp)?;
        Ok(items
            .into_iter()
            .filter(|ctr| {
                let ctr_name = ctr
                    .metadata
                    .as_ref()
                    .map(|m| m.name.as_str())
                    .unwrap_or_default();
                let image = ctr
                    .image
                    .as_ref()
                    .map(|i| i.image.as_str())
                    .unwrap_or_default();
                name.as_ref().map_or(true, |re| re.is_match(ctr_name))
                    && (self.image.is_empty()
                        || image == self.image
                        || ctr.image_ref == self.image)
            })
            .collect())
    }
}

fn compile(field: &str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| PodError::Validation(format!("invalid {} pattern {}: {}", field, pattern, e)))
}
