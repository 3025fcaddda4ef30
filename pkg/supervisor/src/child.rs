use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pkg_constants::timing::EXIT_STATUS_SETTLE_SECS;

use crate::exit::{ExitSlot, ExitStatus};

/// Reap `pid` without blocking. Only ever targets the given pid so that
/// unrelated children are left to their own waiters.
pub fn reap_nonblocking(pid: Pid) -> Option<ExitStatus> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => ExitStatus::from_wait_status(status),
        Err(Errno::ECHILD) => {
            debug!("Child {} already reaped", pid);
            None
        }
        Err(e) => {
            warn!("waitpid({}) failed: {}", pid, e);
            None
        }
    }
}

/// Supervise `child` until its exit status is known.
///
/// Two paths race to fill `slot`: a non-blocking `waitpid` run whenever
/// SIGCHLD arrives on `signals`, and a task blocked on the child handle.
/// Any other signal is turned into SIGTERM for the child.
///
/// If the direct wait fails and the other path has not produced a status
/// within a few seconds the exit status is unknown and an error is returned.
pub async fn supervise(
    mut child: Child,
    mut signals: mpsc::Receiver<Signal>,
    slot: ExitSlot,
) -> anyhow::Result<ExitStatus> {
    let raw_pid = child.id().context("child exited before it could be supervised")?;
    let pid = Pid::from_raw(raw_pid as i32);
    info!("Supervising child process {}", pid);

    let direct_slot = slot.clone();
    let mut direct = tokio::spawn(async move {
        let status = child.wait().await?;
        if let Some(exit) = ExitStatus::from_std(status) {
            direct_slot.offer(exit);
        }
        Ok::<_, std::io::Error>(())
    });

    let mut signals_open = true;
    let mut direct_done = false;
    loop {
        tokio::select! {
            status = slot.wait() => {
                if let Some(status) = status {
                    info!("Child {} exited with code {} ({:?})", pid, status.code, status.collected_via);
                    return Ok(status);
                }
            }
            sig = signals.recv(), if signals_open => match sig {
                Some(Signal::SIGCHLD) => {
                    if let Some(status) = reap_nonblocking(pid) {
                        slot.offer(status);
                    }
                }
                Some(sig) => {
                    info!("Received {}, sending SIGTERM to child {}", sig, pid);
                    if let Err(e) = kill(pid, Signal::SIGTERM) {
                        warn!("Failed to signal child {}: {}", pid, e);
                    }
                }
                None => signals_open = false,
            },
            res = &mut direct, if !direct_done => {
                direct_done = true;
                let err = match res {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                debug!("Direct wait on child {} failed: {}", pid, err);
                let settle = Duration::from_secs(EXIT_STATUS_SETTLE_SECS);
                return match tokio::time::timeout(settle, slot.wait()).await {
                    Ok(Some(status)) => {
                        info!("Child {} exited with code {} ({:?})", pid, status.code, status.collected_via);
                        Ok(status)
                    }
                    _ => anyhow::bail!("could not determine exit status of child {}: {}", pid, err),
                };
            }
        }
    }
}
