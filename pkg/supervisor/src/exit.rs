use nix::sys::wait::WaitStatus;
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use tokio::sync::watch;

/// Which path reaped the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectedVia {
    /// `waitpid(pid, WNOHANG)` run on SIGCHLD.
    Wait4Race,
    /// The blocking wait on the child handle.
    DirectWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub collected_via: CollectedVia,
}

impl ExitStatus {
    /// Exit code for a normal exit, `128 + signal` for a signal death.
    /// `None` for stop/continue notifications.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        let code = match status {
            WaitStatus::Exited(_, code) => code,
            WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
            _ => return None,
        };
        Some(Self {
            code,
            collected_via: CollectedVia::Wait4Race,
        })
    }

    pub fn from_std(status: std::process::ExitStatus) -> Option<Self> {
        let code = status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))?;
        Some(Self {
            code,
            collected_via: CollectedVia::DirectWait,
        })
    }
}

/// Single-assignment slot for a child's exit status.
///
/// Any number of producers may offer a status; only the first is kept.
#[derive(Debug, Clone)]
pub struct ExitSlot {
    tx: Arc<watch::Sender<Option<ExitStatus>>>,
}

impl Default for ExitSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Store `status` unless one is already stored. Returns whether this
    /// call won.
    pub fn offer(&self, status: ExitStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(status);
            true
        })
    }

    pub fn get(&self) -> Option<ExitStatus> {
        *self.tx.borrow()
    }

    /// Wait until a status has been stored.
    pub async fn wait(&self) -> Option<ExitStatus> {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        }
    }
}
