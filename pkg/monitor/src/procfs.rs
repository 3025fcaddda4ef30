use nix::unistd::Pid;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use pkg_constants::paths::PROC_ROOT;

#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    #[error("no process with a command line containing {0:?}")]
    NotFound(String),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads `<root>/<pid>/cmdline` entries. The root is `/proc` outside tests.
#[derive(Debug, Clone)]
pub struct ProcScanner {
    root: PathBuf,
    excluded: Vec<i32>,
}

impl Default for ProcScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcScanner {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Our own pid and our parent's are excluded from [`ProcScanner::find`];
    /// the parent is the supervisor and carries the same arguments.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: vec![
                std::process::id() as i32,
                nix::unistd::getppid().as_raw(),
            ],
        }
    }

    /// Never return `pid` from [`ProcScanner::find`].
    pub fn exclude(mut self, pid: Pid) -> Self {
        self.excluded.push(pid.as_raw());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lowest pid whose command line has an argument containing `needle`.
    ///
    /// Entries that vanish or cannot be read mid-scan are skipped. Excluded
    /// pids are never returned.
    pub fn find(&self, needle: &str) -> Result<Pid, ProcError> {
        if needle.is_empty() {
            return Err(ProcError::NotFound(String::new()));
        }
        let mut buf = Vec::with_capacity(4096);

        for pid in self.pids()? {
            if self.excluded.contains(&pid) {
                continue;
            }
            let path = self.cmdline_path(pid);
            match read_into(&path, &mut buf) {
                Ok(()) => {
                    if cmdline_contains(&buf, needle.as_bytes()) {
                        return Ok(Pid::from_raw(pid));
                    }
                }
                Err(e) => debug!("Skipping unreadable {}: {}", path.display(), e),
            }
        }
        Err(ProcError::NotFound(needle.to_string()))
    }

    /// Whether `pid` is still a live process. Zombies have an empty command
    /// line and count as gone.
    pub fn pid_exists(&self, pid: Pid) -> Result<bool, ProcError> {
        let mut buf = Vec::new();
        self.read_cmdline(pid, &mut buf)
            .map(|found| found && !buf.is_empty())
    }

    /// Whether `pid` is alive and its command line still contains `needle`.
    pub fn matches(&self, pid: Pid, needle: &str) -> Result<bool, ProcError> {
        let mut buf = Vec::new();
        Ok(self.read_cmdline(pid, &mut buf)? && cmdline_contains(&buf, needle.as_bytes()))
    }

    /// Ok(false) when the entry does not exist.
    fn read_cmdline(&self, pid: Pid, buf: &mut Vec<u8>) -> Result<bool, ProcError> {
        let path = self.cmdline_path(pid.as_raw());
        match read_into(&path, buf) {
            Ok(()) => Ok(true),
            Err(e) if is_gone(&e) => Ok(false),
            Err(source) => Err(ProcError::Io { path, source }),
        }
    }

    fn pids(&self) -> Result<Vec<i32>, ProcError> {
        let io_err = |source| ProcError::Io {
            path: self.root.clone(),
            source,
        };
        let mut pids = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    fn cmdline_path(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string()).join("cmdline")
    }
}

fn read_into(path: &Path, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    std::fs::File::open(path)?.read_to_end(buf)?;
    Ok(())
}

// ESRCH shows up when the process exits between open and read.
fn is_gone(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32)
}

fn cmdline_contains(cmdline: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return false;
    }
    cmdline
        .split(|b| *b == 0)
        .any(|arg| arg.windows(needle.len()).any(|w| w == needle))
}
