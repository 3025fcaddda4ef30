use anyhow::Context;
use nix::unistd::getuid;
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{error, info, warn};

use pkg_constants::hypervisor::NO_FORK_FLAG;

use crate::caps;
use crate::child::supervise;
use crate::cleanup::Cleanup;
use crate::exit::ExitSlot;
use crate::signals::{self, SUPERVISED_SIGNALS};

/// Parent side of the launcher: re-exec ourselves as the real launcher,
/// wait for it, then clean up after it.
pub struct ForkSupervisor {
    program: PathBuf,
    args: Vec<OsString>,
    drop_privileges: bool,
    cleanup: Cleanup,
}

impl ForkSupervisor {
    /// Re-exec the running binary with `args` plus `--no-fork`. Capabilities
    /// are narrowed unless we run as root.
    pub fn new(args: Vec<OsString>, cleanup: Cleanup) -> anyhow::Result<Self> {
        let program = std::env::current_exe().context("failed to resolve current executable")?;
        let mut args = args;
        args.push(NO_FORK_FLAG.into());
        Ok(Self {
            program,
            args,
            drop_privileges: !getuid().is_root(),
            cleanup,
        })
    }

    /// Run `program` with `args` verbatim.
    pub fn with_command(program: impl Into<PathBuf>, args: Vec<OsString>, cleanup: Cleanup) -> Self {
        Self {
            program: program.into(),
            args,
            drop_privileges: false,
            cleanup,
        }
    }

    pub fn with_drop_privileges(mut self, drop_privileges: bool) -> Self {
        self.drop_privileges = drop_privileges;
        self
    }

    /// Returns the child's exit code. A child whose exit status cannot be
    /// determined counts as exit code 1.
    pub async fn run(self) -> anyhow::Result<i32> {
        let signals = signals::register(SUPERVISED_SIGNALS)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if self.drop_privileges {
            // SAFETY: retain_net_bind_service only issues syscalls.
            unsafe {
                cmd.pre_exec(caps::retain_net_bind_service);
            }
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;
        info!(
            "Started child {} (pid {:?}, drop_privileges={})",
            self.program.display(),
            child.id(),
            self.drop_privileges
        );

        let code = match supervise(child, signals, ExitSlot::new()).await {
            Ok(status) => status.code,
            Err(e) => {
                error!("Dirty shutdown: {:#}", e);
                1
            }
        };

        if let Err(e) = self.cleanup.run().await {
            warn!("Cleanup after child exit failed (child exit code {})", code);
            return Err(e);
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_monitor::OrphanReaper;

    fn cleanup_in(dir: &std::path::Path) -> Cleanup {
        Cleanup::new(dir.to_path_buf(), None).with_reaper(
            OrphanReaper::new().with_names(vec![format!("{}/qemu-system", dir.display())]),
        )
    }

    #[tokio::test]
    async fn test_child_exit_code_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk0.sock"), "").unwrap();
        std::fs::write(dir.path().join("disk0.img"), "").unwrap();

        let supervisor = ForkSupervisor::with_command(
            "sh",
            vec!["-c".into(), "exit 7".into()],
            cleanup_in(dir.path()),
        );
        assert_eq!(supervisor.run().await.unwrap(), 7);
        assert!(!dir.path().join("disk0.sock").exists());
        assert!(dir.path().join("disk0.img").exists());
    }

    #[tokio::test]
    async fn test_start_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ForkSupervisor::with_command(
            dir.path().join("does-not-exist"),
            Vec::new(),
            cleanup_in(dir.path()),
        );
        assert!(supervisor.run().await.is_err());
    }

    #[test]
    fn test_reexec_appends_no_fork() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor =
            ForkSupervisor::new(vec!["--name".into(), "vm".into()], cleanup_in(dir.path()))
                .unwrap();
        assert_eq!(supervisor.args.last(), Some(&OsString::from(NO_FORK_FLAG)));
        assert_eq!(supervisor.drop_privileges, !getuid().is_root());
    }

    #[tokio::test]
    async fn test_dropped_privileges_child_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ForkSupervisor::with_command(
            "sh",
            vec!["-c".into(), "exit 4".into()],
            cleanup_in(dir.path()),
        )
        .with_drop_privileges(true);
        assert_eq!(supervisor.run().await.unwrap(), 4);
    }
}
