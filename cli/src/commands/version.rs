//! `a3s-pod version` command.

use a3s_pod_core::AgentConfig;
use clap::Args;

#[derive(Args)]
pub struct VersionArgs {
    /// Only print the client version
    #[arg(long)]
    pub client: bool,
}

pub async fn execute(
    args: VersionArgs,
    config: &AgentConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("a3s-pod version {}", a3s_pod_core::VERSION);
    if args.client {
        return Ok(());
    }

    let runtime = super::connect(config).await?;
    let version = runtime.version().await?;
    println!("Runtime: {} {}", version.runtime_name, version.runtime_version);
    println!("Runtime API: {}", version.runtime_api_version);
    Ok(())
}
