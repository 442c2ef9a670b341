//! `a3s-pod run-pod` command: sandbox plus containers in one shot.

use std::path::PathBuf;

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::{ContainerConfig, PodSandboxConfig};
use clap::Args;
use serde::Deserialize;

#[derive(Args)]
pub struct RunPodArgs {
    /// YAML file with `pod`, `containers` and an optional `runtime_handler`
    pub file: PathBuf,
}

/// Layout of the run-pod file.
#[derive(Debug, Deserialize)]
struct RunPodFile {
    pod: PodSandboxConfig,
    #[serde(default)]
    containers: Vec<ContainerConfig>,
    #[serde(default)]
    runtime_handler: Option<String>,
}

pub async fn execute(args: RunPodArgs, config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file: RunPodFile = super::read_yaml(&args.file)?;
    let handler = file
        .runtime_handler
        .as_deref()
        .unwrap_or(&config.runtime_handler);

    let runtime = super::connect(config).await?;
    let resp = runtime
        .run_containers(&file.pod, &file.containers, handler)
        .await?;

    println!("Pod: {}", resp.pod_id);
    for id in &resp.container_ids {
        println!("Container: {id}");
    }
    Ok(())
}
