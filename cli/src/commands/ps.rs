//! `a3s-pod ps` command: list containers.

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::Container;
use a3s_pod_cri::{CriContainerState, ListContainerOptions};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct PsArgs {
    /// Show all containers (default shows running only)
    #[arg(short, long)]
    pub all: bool,

    /// Filter by sandbox id
    #[arg(short, long)]
    pub pod: Option<String>,

    /// Filter by name (regular expression)
    #[arg(long)]
    pub name: Option<String>,

    /// Filter by image reference
    #[arg(long)]
    pub image: Option<String>,

    /// Filter by state: created, running, exited or unknown
    #[arg(long, value_parser = parse_state)]
    pub state: Option<CriContainerState>,

    /// Filter by label (key=value), repeatable
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    /// Only show container ids
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_state(s: &str) -> Result<CriContainerState, String> {
    match s.to_ascii_lowercase().as_str() {
        "created" => Ok(CriContainerState::Created),
        "running" => Ok(CriContainerState::Running),
        "exited" => Ok(CriContainerState::Exited),
        "unknown" => Ok(CriContainerState::Unknown),
        other => Err(format!(
            "invalid container state {other}, choose from [created, running, exited, unknown]"
        )),
    }
}

pub async fn execute(args: PsArgs, config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = match args.state {
        Some(state) => Some(state),
        None if args.all => None,
        None => Some(CriContainerState::Running),
    };
    let opts = ListContainerOptions {
        id: String::new(),
        pod_id: args.pod.unwrap_or_default(),
        name_regexp: args.name.unwrap_or_default(),
        state,
        labels: super::parse_labels(&args.labels)?,
        image: args.image.unwrap_or_default(),
    };
    let runtime = super::connect(config).await?;
    let containers = runtime.list_containers(&opts).await?;

    if args.quiet {
        for ctr in &containers {
            println!("{}", ctr.id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["CONTAINER", "IMAGE", "CREATED", "STATE", "NAME", "POD ID"]);
    for ctr in &containers {
        table.add_row(row(ctr));
    }

    println!("{table}");
    Ok(())
}

fn row(ctr: &Container) -> [String; 6] {
    let name = ctr
        .metadata
        .as_ref()
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let image = match &ctr.image {
        Some(spec) if !spec.image.is_empty() => spec.image.clone(),
        _ => ctr.image_ref.clone(),
    };
    let state = match CriContainerState::from_proto(ctr.state) {
        CriContainerState::Created => "Created",
        CriContainerState::Running => "Running",
        CriContainerState::Exited => "Exited",
        CriContainerState::Unknown => "Unknown",
    };
    [
        output::short_id(&ctr.id).to_string(),
        image,
        output::format_ago(&output::from_nanos(ctr.created_at)),
        state.to_string(),
        name,
        output::short_id(&ctr.pod_sandbox_id).to_string(),
    ]
}
