//! CLI command definitions and dispatch.

mod container;
mod images;
mod pod;
mod pods;
mod ps;
mod pull;
mod run_pod;
mod version;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::{CriClient, RuntimeClient};
use a3s_pod_runtime::{
    ControlPlane, HttpControlPlane, NoopControlPlane, PodDeps, PodManager, SystemHostOps,
};
use clap::{Parser, Subcommand};

/// A3S Pod: pod and container lifecycle over CRI.
#[derive(Parser)]
#[command(name = "a3s-pod", version, about)]
pub struct Cli {
    /// Agent config file (defaults to ~/.a3s/pod.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// CRI endpoint, overriding the config file
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Show client and runtime versions
    Version(version::VersionArgs),
    /// List images known to the runtime
    Images(images::ImagesArgs),
    /// List pod sandboxes
    Pods(pods::PodsArgs),
    /// List containers
    Ps(ps::PsArgs),
    /// Pull an image
    Pull(pull::PullArgs),
    /// Run a sandbox and its containers from a YAML file in one go
    RunPod(run_pod::RunPodArgs),
    /// Manage pods tracked on this host
    Pod(pod::PodArgs),
    /// Manage containers of a pod
    Container(container::ContainerArgs),
}

/// Resolve the agent config: file, then flag overrides.
pub(crate) fn load_config(cli: &Cli) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => {
            let path = AgentConfig::default_path();
            if path.exists() {
                AgentConfig::load(&path)?
            } else {
                AgentConfig::default()
            }
        }
    };
    if let Some(endpoint) = &cli.endpoint {
        config.cri_endpoint = endpoint.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Parse repeated `key=value` flags.
pub(crate) fn parse_labels(labels: &[String]) -> Result<HashMap<String, String>, String> {
    labels
        .iter()
        .map(|l| match l.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(format!("invalid label {l}, expected key=value")),
        })
        .collect()
}

/// Read a YAML document from a file.
pub(crate) fn read_yaml<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let value = serde_yaml::from_str(&data)
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
    Ok(value)
}

/// Connect to the CRI endpoint.
pub(crate) async fn connect(
    config: &AgentConfig,
) -> Result<Arc<dyn RuntimeClient>, Box<dyn std::error::Error>> {
    let client = CriClient::connect(&config.cri_endpoint, config.cri_timeout())
        .await?
        .with_pull_timeout(config.image_pull_timeout());
    Ok(Arc::new(client))
}

/// Build a pod manager over the real host and load the pods on disk.
pub(crate) async fn open_manager(
    config: AgentConfig,
) -> Result<PodManager, Box<dyn std::error::Error>> {
    let runtime = connect(&config).await?;
    let control: Arc<dyn ControlPlane> = match &config.control_plane_url {
        Some(url) => Arc::new(HttpControlPlane::new(url, config.cri_timeout())?),
        None => Arc::new(NoopControlPlane),
    };
    let deps = PodDeps::new(config, runtime, control, Arc::new(SystemHostOps::new()));
    let manager = PodManager::new(deps);
    manager.load_all()?;
    Ok(manager)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Version(args) => version::execute(args, &config).await,
        Command::Images(args) => images::execute(args, &config).await,
        Command::Pods(args) => pods::execute(args, &config).await,
        Command::Ps(args) => ps::execute(args, &config).await,
        Command::Pull(args) => pull::execute(args, &config).await,
        Command::RunPod(args) => run_pod::execute(args, &config).await,
        Command::Pod(args) => pod::execute(args, config).await,
        Command::Container(args) => container::execute(args, config).await,
    }
}
