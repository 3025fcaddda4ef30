use anyhow::Context;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use pkg_constants::sidecar::{
    VIRTIOFS_CACHE_MODE, VIRTIOFS_SANDBOX_MODE, VIRTIOFS_SHARED_DIR_ROOT, VIRTIOFSD_BINARY,
};
use pkg_constants::timing::{SOCKET_OWNERSHIP_ATTEMPTS, SOCKET_OWNERSHIP_INTERVAL_SECS};
use pkg_monitor::OrphanReaper;

use crate::child::supervise;
use crate::exit::ExitSlot;
use crate::ownership::OwnershipManager;
use crate::placeholder::{PlaceholderListener, placeholder_path};
use crate::signals::{self, SUPERVISED_SIGNALS};

/// How a sidecar monitor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The helper exited; the process should exit with this code.
    Exited(i32),
    /// The helper failed and keep-after-failure is set. The container stays
    /// up for inspection instead of exiting with this code.
    KeptAlive(i32),
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub socket_path: PathBuf,
    pub volume_name: String,
    pub keep_after_failure: bool,
    pub virtiofsd_path: PathBuf,
}

impl SidecarConfig {
    pub fn new(socket_path: PathBuf, volume_name: String) -> Self {
        Self {
            socket_path,
            volume_name,
            keep_after_failure: false,
            virtiofsd_path: PathBuf::from(VIRTIOFSD_BINARY),
        }
    }
}

/// Program and arguments for the helper process.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl HelperCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// virtiofsd serving `/<volume>` on `socket_path`.
    pub fn virtiofsd(config: &SidecarConfig) -> Self {
        let shared_dir = Path::new(VIRTIOFS_SHARED_DIR_ROOT).join(&config.volume_name);
        Self::new(
            &config.virtiofsd_path,
            vec![
                "--socket-path".into(),
                config.socket_path.clone().into_os_string(),
                "--shared-dir".into(),
                shared_dir.into_os_string(),
                "--cache".into(),
                VIRTIOFS_CACHE_MODE.into(),
                "--sandbox".into(),
                VIRTIOFS_SANDBOX_MODE.into(),
                "--xattr".into(),
            ],
        )
    }
}

/// Runs a helper process next to the VM and supervises it like the
/// launcher supervises its child.
pub struct SidecarMonitor {
    socket_path: PathBuf,
    keep_after_failure: bool,
    helper: HelperCommand,
    ownership: Arc<dyn OwnershipManager>,
    reaper: OrphanReaper,
    ownership_attempts: u32,
    ownership_interval: Duration,
}

impl SidecarMonitor {
    pub fn new(config: SidecarConfig, ownership: Arc<dyn OwnershipManager>) -> Self {
        let helper = HelperCommand::virtiofsd(&config);
        Self {
            socket_path: config.socket_path,
            keep_after_failure: config.keep_after_failure,
            helper,
            ownership,
            reaper: OrphanReaper::new(),
            ownership_attempts: SOCKET_OWNERSHIP_ATTEMPTS,
            ownership_interval: Duration::from_secs(SOCKET_OWNERSHIP_INTERVAL_SECS),
        }
    }

    pub fn with_helper(mut self, helper: HelperCommand) -> Self {
        self.helper = helper;
        self
    }

    pub fn with_reaper(mut self, reaper: OrphanReaper) -> Self {
        self.reaper = reaper;
        self
    }

    pub fn with_ownership_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.ownership_attempts = attempts;
        self.ownership_interval = interval;
        self
    }

    pub async fn run(self) -> anyhow::Result<Termination> {
        let placeholder = PlaceholderListener::bind(placeholder_path(&self.socket_path))?;
        let signals = signals::register(SUPERVISED_SIGNALS)?;

        let child = Command::new(&self.helper.program)
            .args(&self.helper.args)
            .spawn()
            .with_context(|| format!("failed to start {}", self.helper.program.display()))?;
        info!(
            "Started {} (pid {:?})",
            self.helper.program.display(),
            child.id()
        );

        let slot = ExitSlot::new();
        let ownership_task = tokio::spawn(fix_socket_ownership(
            self.ownership.clone(),
            self.socket_path.clone(),
            self.ownership_attempts,
            self.ownership_interval,
            slot.clone(),
        ));

        let code = match supervise(child, signals, slot).await {
            Ok(status) => status.code,
            Err(e) => {
                error!("Dirty shutdown: {:#}", e);
                1
            }
        };

        match ownership_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{:#}", e),
            Err(e) => warn!("Socket ownership task failed: {}", e),
        }
        placeholder.close().await;
        let reaped = self.reaper.reap().await;
        if let Err(e) = &reaped {
            error!("Failed to reap orphaned processes: {:#}", e);
        }

        if code != 0 && self.keep_after_failure {
            warn!(
                "Helper exited with code {}, keeping the container alive",
                code
            );
            return Ok(Termination::KeptAlive(code));
        }
        reaped?;
        Ok(Termination::Exited(code))
    }
}

/// Hand the helper's control socket to the hypervisor user. The socket may
/// not exist yet, so this retries; it gives up early once the helper is gone.
async fn fix_socket_ownership(
    ownership: Arc<dyn OwnershipManager>,
    socket_path: PathBuf,
    attempts: u32,
    interval: Duration,
    exited: ExitSlot,
) -> anyhow::Result<()> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        if exited.get().is_some() {
            debug!("Helper exited, not fixing ownership of {}", socket_path.display());
            return Ok(());
        }
        match ownership.set_file_ownership(&socket_path) {
            Ok(()) => {
                info!("Set ownership of {}", socket_path.display());
                return Ok(());
            }
            Err(e) => {
                debug!(
                    "Ownership of {} not set (attempt {}/{}): {}",
                    socket_path.display(),
                    attempt,
                    attempts,
                    e
                );
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    match last_err {
        Some(e) => Err(e).with_context(|| {
            format!(
                "failed to set ownership of {} after {} attempts",
                socket_path.display(),
                attempts
            )
        }),
        None => Ok(()),
    }
}
