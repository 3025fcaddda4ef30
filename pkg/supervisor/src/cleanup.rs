use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use pkg_constants::paths::CONTAINER_DISK_SOCKET_EXT;
use pkg_monitor::OrphanReaper;

use crate::proxy::SidecarProxy;

/// Remove `<dir>/*.sock`. Best effort; returns how many were removed.
pub fn remove_container_disk_sockets(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping socket cleanup in {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_DISK_SOCKET_EXT) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

/// Everything that has to happen after the launcher child is gone.
pub struct Cleanup {
    container_disk_dir: PathBuf,
    proxy: Option<SidecarProxy>,
    reaper: OrphanReaper,
}

impl Cleanup {
    pub fn new(container_disk_dir: PathBuf, proxy: Option<SidecarProxy>) -> Self {
        Self {
            container_disk_dir,
            proxy,
            reaper: OrphanReaper::new(),
        }
    }

    pub fn with_reaper(mut self, reaper: OrphanReaper) -> Self {
        self.reaper = reaper;
        self
    }

    /// Socket and proxy cleanup never fail. An orphaned hypervisor that
    /// cannot be terminated is an error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let removed = remove_container_disk_sockets(&self.container_disk_dir);
        if removed > 0 {
            info!(
                "Removed {} container disk socket(s) from {}",
                removed,
                self.container_disk_dir.display()
            );
        }

        if let Some(proxy) = &self.proxy {
            proxy.terminate_if_present().await;
        }

        self.reaper.reap().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sockets_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["disk0.sock", "disk1.sock", "disk.img", "sock"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        assert_eq!(remove_container_disk_sockets(dir.path()), 2);
        assert!(!dir.path().join("disk0.sock").exists());
        assert!(!dir.path().join("disk1.sock").exists());
        assert!(dir.path().join("disk.img").exists());
        assert!(dir.path().join("sock").exists());
    }

    #[test]
    fn test_missing_dir() {
        assert_eq!(
            remove_container_disk_sockets(Path::new("/nonexistent/container-disks")),
            0
        );
    }

    #[tokio::test]
    async fn test_run_without_orphan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk0.sock"), "").unwrap();

        let cleanup = Cleanup::new(dir.path().to_path_buf(), None).with_reaper(
            OrphanReaper::new().with_names(vec![format!("{}/qemu-kvm", dir.path().display())]),
        );
        cleanup.run().await.unwrap();
        assert!(!dir.path().join("disk0.sock").exists());
    }
}
