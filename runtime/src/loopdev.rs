//! Reference-counted loop device allocator.
//!
//! Loop devices are host-global. Every claim is recorded against a holder
//! (a container or a volume mount point); a backing file is attached on its
//! first claim and detached when the last holder lets go.
//!
//! The claim table lives in memory, so after an agent restart the host's
//! `losetup` listing is consulted: a device already attached to a backing
//! file is adopted instead of attaching a second one, and pod cleanup
//! detaches by backing file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pod_core::error::Result;
use tokio::sync::Mutex;

use crate::host::HostOps;

#[derive(Debug)]
struct Attachment {
    device: String,
    /// holder -> number of claims
    holders: HashMap<String, usize>,
}

impl Attachment {
    fn refcount(&self) -> usize {
        self.holders.values().sum()
    }
}

pub struct LoopAllocator {
    host: Arc<dyn HostOps>,
    attachments: Mutex<HashMap<PathBuf, Attachment>>,
}

impl LoopAllocator {
    pub fn new(host: Arc<dyn HostOps>) -> Self {
        Self {
            host,
            attachments: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the loop device for `backing_file` on behalf of `holder`.
    pub async fn acquire(&self, backing_file: &Path, holder: &str) -> Result<String> {
        let mut attachments = self.attachments.lock().await;
        if let Some(att) = attachments.get_mut(backing_file) {
            *att.holders.entry(holder.to_string()).or_insert(0) += 1;
            tracing::debug!(
                backing_file = %backing_file.display(),
                device = %att.device,
                holder,
                refcount = att.refcount(),
                "Reusing loop device"
            );
            return Ok(att.device.clone());
        }

        let adopted = self
            .host
            .list_loops()
            .await?
            .into_iter()
            .find(|l| l.backing_file == backing_file)
            .map(|l| l.device);
        let device = match adopted {
            Some(device) => {
                tracing::info!(
                    backing_file = %backing_file.display(),
                    device = %device,
                    holder,
                    "Adopting attached loop device"
                );
                device
            }
            None => self.host.attach_loop(backing_file).await?,
        };
        let mut holders = HashMap::new();
        holders.insert(holder.to_string(), 1);
        attachments.insert(
            backing_file.to_path_buf(),
            Attachment {
                device: device.clone(),
                holders,
            },
        );
        Ok(device)
    }

    /// Drop every claim held by `holder`, detaching devices nobody uses.
    ///
    /// Keeps going after a failed detach and returns the first error; the
    /// failed attachment stays recorded so a later release can retry.
    pub async fn release(&self, holder: &str) -> Result<()> {
        let mut attachments = self.attachments.lock().await;
        let mut first_err = None;
        let mut unused = Vec::new();

        for (backing, att) in attachments.iter_mut() {
            if att.holders.remove(holder).is_some() && att.holders.is_empty() {
                unused.push(backing.clone());
            }
        }

        for backing in unused {
            let device = match attachments.get(&backing) {
                Some(att) => att.device.clone(),
                None => continue,
            };
            match self.host.detach_loop(&device).await {
                Ok(()) => {
                    attachments.remove(&backing);
                }
                Err(e) => {
                    tracing::warn!(device = %device, error = %e, "Failed to detach loop device");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Detach every device backed by one of `backing_files`, regardless of
    /// holders. Devices attached before a restart are found through the host
    /// listing. Used when the pod owning the files is cleaned up.
    pub async fn detach_all(&self, backing_files: &[PathBuf]) -> Result<()> {
        let mut attachments = self.attachments.lock().await;
        let mut first_err = None;

        let listed = match self.host.list_loops().await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list loop devices");
                first_err.get_or_insert(e);
                Vec::new()
            }
        };

        for backing in backing_files {
            let mut devices: Vec<String> = Vec::new();
            if let Some(att) = attachments.remove(backing) {
                devices.push(att.device);
            }
            for l in listed.iter().filter(|l| &l.backing_file == backing) {
                if !devices.contains(&l.device) {
                    devices.push(l.device.clone());
                }
            }
            for device in devices {
                if let Err(e) = self.host.detach_loop(&device).await {
                    tracing::warn!(device = %device, error = %e, "Failed to detach loop device");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn refcount(&self, backing_file: &Path) -> usize {
        self.attachments
            .lock()
            .await
            .get(backing_file)
            .map_or(0, Attachment::refcount)
    }
}
