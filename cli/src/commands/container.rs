//! `a3s-pod container` subcommands: containers of a tracked pod.

use std::path::PathBuf;

use a3s_pod_core::{AgentConfig, ContainerCreateInput};
use clap::{Args, Subcommand};

/// Manage containers.
#[derive(Args)]
pub struct ContainerArgs {
    #[command(subcommand)]
    pub command: ContainerCommand,
}

/// Container subcommands.
#[derive(Subcommand)]
pub enum ContainerCommand {
    /// Create a container from a YAML spec
    Create(SpecArgs),
    /// Start a container, creating or recreating it as needed
    Start(SpecArgs),
    /// Stop a running container
    Stop(StopArgs),
    /// Remove a container
    Delete(TargetArgs),
    /// Show the runtime status of a container
    Status(TargetArgs),
}

#[derive(Args)]
pub struct TargetArgs {
    /// Pod id
    pub pod: String,
    /// Container id
    pub id: String,
}

#[derive(Args)]
pub struct SpecArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Container spec file (name, index, spec)
    #[arg(short, long)]
    pub file: PathBuf,
}

#[derive(Args)]
pub struct StopArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Grace period in seconds before the container is killed
    #[arg(short, long)]
    pub timeout: Option<i64>,
}

/// Dispatch container subcommands.
pub async fn execute(
    args: ContainerArgs,
    config: AgentConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_manager(config).await?;
    match args.command {
        ContainerCommand::Create(a) => {
            let input: ContainerCreateInput = super::read_yaml(&a.file)?;
            let pod = manager.get(&a.target.pod)?;
            let cri_id = pod.create_container(&a.target.id, &input).await?;
            println!("{cri_id}");
        }
        ContainerCommand::Start(a) => {
            let input: ContainerCreateInput = super::read_yaml(&a.file)?;
            let pod = manager.get(&a.target.pod)?;
            let cri_id = pod.start_container(&a.target.id, &input).await?;
            println!("{cri_id}");
        }
        ContainerCommand::Stop(a) => {
            let timeout = a
                .timeout
                .unwrap_or(manager.deps().config.stop_timeout_secs);
            let pod = manager.get(&a.target.pod)?;
            pod.stop_container(&a.target.id, timeout).await?;
            println!("{}", a.target.id);
        }
        ContainerCommand::Delete(a) => {
            let pod = manager.get(&a.pod)?;
            pod.delete_container(&a.id).await?;
            println!("{}", a.id);
        }
        ContainerCommand::Status(a) => {
            let pod = manager.get(&a.pod)?;
            let status = pod.sync_container_status(&a.id).await?;
            println!("{status}");
        }
    }
    Ok(())
}
