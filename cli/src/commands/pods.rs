//! `a3s-pod pods` command.

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::{CriSandboxState, ListPodOptions};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct PodsArgs {
    /// Filter by sandbox id
    #[arg(long)]
    pub id: Option<String>,

    /// Filter by name (regular expression)
    #[arg(long)]
    pub name: Option<String>,

    /// Filter by namespace (regular expression)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Filter by state: ready or notready
    #[arg(long, value_parser = parse_state)]
    pub state: Option<CriSandboxState>,

    /// Filter by label (key=value), repeatable
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    /// Only show sandbox ids
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_state(s: &str) -> Result<CriSandboxState, String> {
    match s.to_ascii_lowercase().as_str() {
        "ready" => Ok(CriSandboxState::Ready),
        "notready" | "not_ready" => Ok(CriSandboxState::NotReady),
        other => Err(format!("invalid pod state {other}, choose from [ready, notready]")),
    }
}

pub async fn execute(args: PodsArgs, config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let opts = ListPodOptions {
        id: args.id.unwrap_or_default(),
        name_regexp: args.name.unwrap_or_default(),
        namespace_regexp: args.namespace.unwrap_or_default(),
        state: args.state,
        labels: super::parse_labels(&args.labels)?,
    };
    let runtime = super::connect(config).await?;
    let pods = runtime.list_pods(&opts).await?;

    if args.quiet {
        for pod in &pods {
            println!("{}", pod.id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["POD ID", "CREATED", "STATE", "NAME", "NAMESPACE", "ATTEMPT"]);
    for pod in &pods {
        let meta = pod.metadata.clone().unwrap_or_default();
        let state = match CriSandboxState::from_proto(pod.state) {
            CriSandboxState::Ready => "Ready",
            CriSandboxState::NotReady => "NotReady",
        };
        table.add_row([
            output::short_id(&pod.id).to_string(),
            output::format_ago(&output::from_nanos(pod.created_at)),
            state.to_string(),
            meta.name,
            meta.namespace,
            meta.attempt.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
