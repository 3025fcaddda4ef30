use anyhow::Context;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use pkg_constants::hypervisor::HYPERVISOR_PROCESS_NAMES;
use pkg_constants::timing::{ORPHAN_POLL_INTERVAL_MS, ORPHAN_TERMINATION_TIMEOUT_SECS};

use crate::procfs::{ProcError, ProcScanner};

/// Finds a hypervisor process that outlived its launcher and terminates it.
#[derive(Debug, Clone)]
pub struct OrphanReaper {
    scanner: ProcScanner,
    names: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for OrphanReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl OrphanReaper {
    pub fn new() -> Self {
        Self {
            scanner: ProcScanner::new(),
            names: HYPERVISOR_PROCESS_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(ORPHAN_TERMINATION_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(ORPHAN_POLL_INTERVAL_MS),
        }
    }

    /// Command-line substrings to look for, tried in order.
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_scanner(mut self, scanner: ProcScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// SIGTERM the first matching process and wait for it to go away.
    ///
    /// Returns the pid that was terminated, or `None` if nothing matched.
    /// Fails if the process cannot be signalled or is still there after the
    /// timeout.
    pub async fn reap(&self) -> anyhow::Result<Option<Pid>> {
        let Some((pid, name)) = self.find() else {
            debug!("No orphaned hypervisor process found");
            return Ok(None);
        };

        info!("Terminating orphaned hypervisor process {} ({})", pid, name);
        kill(pid, Signal::SIGTERM)
            .with_context(|| format!("failed to send SIGTERM to orphaned process {}", pid))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.scanner.matches(pid, name) {
                Ok(false) => {
                    info!("Orphaned hypervisor process {} is gone", pid);
                    return Ok(Some(pid));
                }
                Ok(true) => {}
                Err(e) => warn!("Failed to check orphaned process {}: {}", pid, e),
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "orphaned hypervisor process {} still running after {:?}",
                    pid,
                    self.timeout
                );
            }
        }
    }

    fn find(&self) -> Option<(Pid, &str)> {
        for name in &self.names {
            match self.scanner.find(name) {
                Ok(pid) => return Some((pid, name.as_str())),
                Err(ProcError::NotFound(_)) => {}
                Err(e) => warn!("Process scan for {:?} failed: {}", name, e),
            }
        }
        None
    }
}
