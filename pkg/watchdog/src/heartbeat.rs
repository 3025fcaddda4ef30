use anyhow::Context;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{DomainKey, watchdog_dir};

// ============================================================
// Watchdog file operations
// ============================================================

/// Write `identifier` into the watchdog file and refresh its mtime.
///
/// The content goes to a sibling temp file first and is renamed into place,
/// so a concurrent reader sees either the old or the new identifier.
pub fn update(path: &Path, identifier: &str) -> io::Result<()> {
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(identifier.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// True when the file is absent or `now - mtime > timeout`.
///
/// An mtime in the future (clock skew) counts as age zero.
pub fn is_expired(path: &Path, timeout: Duration, now: SystemTime) -> io::Result<bool> {
    let mtime = match std::fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
    Ok(age > timeout)
}

/// Remove the watchdog file. A missing file is not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Identifier stored in the watchdog file, or `None` if the file is gone.
pub fn read_identifier(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Every domain under `<base>/watchdog-files` whose heartbeat is older than
/// `timeout`. Returns an empty list when the directory does not exist yet.
pub fn expired_domains(
    base_dir: &Path,
    timeout: Duration,
    now: SystemTime,
) -> anyhow::Result<Vec<DomainKey>> {
    let dir = watchdog_dir(base_dir);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("read watchdog dir {}", dir.display()));
        }
    };

    let mut expired = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read watchdog dir {}", dir.display()))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            warn!("Skipping watchdog file with non-UTF-8 name: {:?}", file_name);
            continue;
        };
        // leftovers from an interrupted update()
        if file_name.starts_with('.') {
            continue;
        }
        let Some(key) = DomainKey::parse(file_name) else {
            warn!("Skipping malformed watchdog file name: {}", file_name);
            continue;
        };
        match is_expired(&entry.path(), timeout, now) {
            Ok(true) => expired.push(key),
            Ok(false) => {}
            Err(e) => warn!("Failed to stat watchdog file for {}: {}", key, e),
        }
    }
    expired.sort();
    Ok(expired)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

// ============================================================
// Heartbeat ticker
// ============================================================

/// Background task that keeps a watchdog file fresh.
pub struct Heartbeat {
    path: PathBuf,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Write the watchdog file once, then refresh it every `interval` until
    /// [`Heartbeat::stop`] is called. The first write must succeed; later
    /// failures are logged and retried on the next tick.
    pub fn start(path: PathBuf, identifier: String, interval: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!interval.is_zero(), "watchdog interval must be positive");
        update(&path, &identifier)
            .with_context(|| format!("write watchdog file {}", path.display()))?;
        info!("Watchdog heartbeat started for {}", path.display());

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately and the file was just written
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match update(&task_path, &identifier) {
                            Ok(()) => debug!("Watchdog heartbeat refreshed: {}", task_path.display()),
                            Err(e) => warn!("Failed to refresh watchdog file {}: {}", task_path.display(), e),
                        }
                    }
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            path,
            stop_tx,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop refreshing and wait for the task to finish. The file is left in
    /// place; callers remove it when the VM is torn down.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Watchdog heartbeat task failed: {}", e);
        }
        info!("Watchdog heartbeat stopped for {}", self.path.display());
    }
}
