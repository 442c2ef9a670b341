//! `a3s-pod images` command.

use a3s_pod_core::AgentConfig;
use a3s_pod_cri::cri_api::{Image, ImageFilter, ImageSpec};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only list images matching this reference
    pub image: Option<String>,

    /// Only show image ids
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ImagesArgs, config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::connect(config).await?;
    let filter = args.image.map(|image| ImageFilter {
        image: Some(ImageSpec {
            image,
            ..Default::default()
        }),
    });
    let images = runtime.list_images(filter).await?;

    if args.quiet {
        for image in &images {
            println!("{}", image.id);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["IMAGE", "TAG", "IMAGE ID", "SIZE"]);
    for image in &images {
        let size = output::format_bytes(image.size);
        for (repo, tag) in repo_tags(image) {
            table.add_row([repo.as_str(), tag.as_str(), output::short_id(&image.id), size.as_str()]);
        }
    }

    println!("{table}");
    Ok(())
}

/// Split each `repo:tag` of an image; untagged images show `<none>`.
fn repo_tags(image: &Image) -> Vec<(String, String)> {
    if image.repo_tags.is_empty() {
        let repo = image
            .repo_digests
            .first()
            .and_then(|d| d.split('@').next())
            .unwrap_or("<none>");
        return vec![(repo.to_string(), "<none>".to_string())];
    }
    image
        .repo_tags
        .iter()
        .map(|rt| match rt.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (rt.clone(), "<none>".to_string()),
        })
        .collect()
}
