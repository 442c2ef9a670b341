//! Host-side operations the agent shells out for: loop devices, mounts and
//! binder device nodes.
//!
//! Behind a trait so the allocator and device managers can run against a
//! recording fake in tests.

use std::path::{Path, PathBuf};

use a3s_pod_core::error::{PodError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

/// A loop device the kernel currently has attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    pub device: String,
    pub backing_file: PathBuf,
}

#[async_trait]
pub trait HostOps: Send + Sync {
    /// Attach a backing file to a free loop device and return the device path.
    async fn attach_loop(&self, backing_file: &Path) -> Result<String>;

    async fn detach_loop(&self, device: &str) -> Result<()>;

    /// Every attached loop device with its backing file.
    async fn list_loops(&self) -> Result<Vec<LoopDevice>>;

    async fn mount(&self, device: &str, target: &Path, fstype: &str) -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Create the binder device `name` through the binder control node.
    async fn create_binder_device(&self, helper: &Path, control: &Path, name: &str)
        -> Result<()>;

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Whether something is mounted at `target`, per `/proc/self/mounts`.
    fn is_mounted(&self, target: &Path) -> bool {
        std::fs::read_to_string("/proc/self/mounts")
            .map(|mounts| mounts_contain(&mounts, target))
            .unwrap_or(false)
    }
}

fn mounts_contain(mounts: &str, target: &Path) -> bool {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| Path::new(mount_point) == target)
}

#[derive(Deserialize)]
struct LosetupList {
    #[serde(default)]
    loopdevices: Vec<LosetupEntry>,
}

#[derive(Deserialize)]
struct LosetupEntry {
    name: String,
    #[serde(rename = "back-file")]
    back_file: Option<String>,
}

/// Parse `losetup --list --json` output. No attached devices prints nothing.
fn parse_loop_list(output: &str) -> Result<Vec<LoopDevice>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: LosetupList = serde_json::from_str(output)?;
    Ok(list
        .loopdevices
        .into_iter()
        .filter_map(|entry| {
            let back_file = entry.back_file?;
            let back_file = back_file.trim_end_matches(" (deleted)");
            Some(LoopDevice {
                device: entry.name,
                backing_file: PathBuf::from(back_file),
            })
        })
        .collect())
}

/// Runs the real host tools (`losetup`, `mount`, `umount`).
#[derive(Debug, Default, Clone)]
pub struct SystemHostOps;

impl SystemHostOps {
    pub fn new() -> Self {
        Self
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| PodError::Command {
            program: program.to_string(),
            message: format!("failed to spawn: {}", e),
        })?;

    if !output.status.success() {
        return Err(PodError::Command {
            program: program.to_string(),
            message: format!(
                "{} (args: {})",
                String::from_utf8_lossy(&output.stderr).trim(),
                args.join(" ")
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| PodError::Validation(format!("non-UTF-8 path {}", path.display())))
}

#[async_trait]
impl HostOps for SystemHostOps {
    async fn attach_loop(&self, backing_file: &Path) -> Result<String> {
        let device = run("losetup", &["--find", "--show", path_str(backing_file)?]).await?;
        if device.is_empty() {
            return Err(PodError::Command {
                program: "losetup".to_string(),
                message: format!("no device reported for {}", backing_file.display()),
            });
        }
        tracing::info!(device = %device, backing_file = %backing_file.display(), "Attached loop device");
        Ok(device)
    }

    async fn detach_loop(&self, device: &str) -> Result<()> {
        run("losetup", &["-d", device]).await?;
        tracing::info!(device, "Detached loop device");
        Ok(())
    }

    async fn list_loops(&self) -> Result<Vec<LoopDevice>> {
        let output = run("losetup", &["--list", "--json", "--output", "NAME,BACK-FILE"]).await?;
        parse_loop_list(&output)
    }

    async fn mount(&self, device: &str, target: &Path, fstype: &str) -> Result<()> {
        tokio::fs::create_dir_all(target).await?;
        run("mount", &["-t", fstype, device, path_str(target)?]).await?;
        tracing::info!(device, target = %target.display(), fstype, "Mounted disk");
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        run("umount", &[path_str(target)?]).await?;
        tracing::info!(target = %target.display(), "Unmounted disk");
        Ok(())
    }

    async fn create_binder_device(
        &self,
        helper: &Path,
        control: &Path,
        name: &str,
    ) -> Result<()> {
        run(path_str(helper)?, &[path_str(control)?, name]).await?;
        tracing::info!(name, "Created binder device");
        Ok(())
    }
}
