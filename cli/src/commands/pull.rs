//! `a3s-pod pull` command.

use std::collections::HashMap;

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::AuthConfig;
use clap::Args;

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "nginx:1.25", "ghcr.io/org/image:tag")
    pub image: String,

    /// Registry user name
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// Registry password
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PullArgs, config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let auth = match (args.username, args.password) {
        (Some(username), Some(password)) => Some(AuthConfig {
            username,
            password,
            ..Default::default()
        }),
        _ => None,
    };

    let runtime = super::connect(config).await?;
    if !args.quiet {
        println!("Pulling {}...", args.image);
    }
    let image_ref = runtime
        .pull_image(&args.image, auth, None, HashMap::new())
        .await?;

    if args.quiet {
        println!("{image_ref}");
    } else {
        println!("Pulled: {} ({})", args.image, image_ref);
    }
    Ok(())
}
