//! `a3s-pod pod` subcommands: pods tracked on this host.

use std::path::PathBuf;

use a3s_pod_core::{AgentConfig, PodDesc};
use clap::{Args, Subcommand};

use crate::output;

/// Manage pods.
#[derive(Args)]
pub struct PodArgs {
    #[command(subcommand)]
    pub command: PodCommand,
}

/// Pod subcommands.
#[derive(Subcommand)]
pub enum PodCommand {
    /// Register a pod from a YAML descriptor
    Create(CreateArgs),
    /// Run the pod sandbox
    Start(IdArgs),
    /// Tear the pod down: sandbox, mounts, loop devices and local state
    Clean(IdArgs),
    /// List pods tracked on this host
    List(ListArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Pod descriptor file
    pub file: PathBuf,
}

#[derive(Args)]
pub struct IdArgs {
    /// Pod id
    pub id: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only display pod ids
    #[arg(short, long)]
    pub quiet: bool,
}

/// Dispatch pod subcommands.
pub async fn execute(args: PodArgs, config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_manager(config).await?;
    match args.command {
        PodCommand::Create(a) => {
            let desc: PodDesc = super::read_yaml(&a.file)?;
            let pod = manager.create_pod(desc)?;
            println!("{}", pod.id());
        }
        PodCommand::Start(a) => {
            let pod = manager.get(&a.id)?;
            let result = pod.start_pod().await?;
            println!("{}", result.sandbox_id);
        }
        PodCommand::Clean(a) => {
            manager.clean_pod(&a.id).await?;
            println!("{}", a.id);
        }
        PodCommand::List(a) => {
            let pods = manager.list();
            if a.quiet {
                for pod in &pods {
                    println!("{}", pod.id());
                }
                return Ok(());
            }

            let mut table = output::new_table(&["POD ID", "NAME", "SANDBOX", "CONTAINERS"]);
            for pod in &pods {
                let desc = pod.desc().await;
                let sandbox = desc.cri_id().map(output::short_id).unwrap_or("<none>");
                table.add_row([
                    pod.id().to_string(),
                    desc.name.clone(),
                    sandbox.to_string(),
                    pod.list_containers().await.len().to_string(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
