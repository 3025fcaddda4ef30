//! Placeholder Unix socket next to the helper's control socket.
//!
//! It accepts connections and throws the data away. Liveness probes can
//! connect to it while the helper is still starting up.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use pkg_constants::sidecar::PLACEHOLDER_SOCKET_SUFFIX;

/// `<socket_path>.placeholder`
pub fn placeholder_path(socket_path: &Path) -> PathBuf {
    let mut s = socket_path.as_os_str().to_owned();
    s.push(PLACEHOLDER_SOCKET_SUFFIX);
    PathBuf::from(s)
}

pub struct PlaceholderListener {
    path: PathBuf,
    closing: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PlaceholderListener {
    /// Bind at `path`, replacing a stale socket file, and start accepting.
    pub fn bind(path: PathBuf) -> anyhow::Result<Self> {
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind placeholder socket {}", path.display()))?;
        info!("Placeholder listener started on {}", path.display());

        let closing = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(accept_loop(listener, closing.clone(), shutdown_rx));

        Ok(Self {
            path,
            closing,
            shutdown_tx,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, drop every open connection and remove the socket
    /// file.
    pub async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Failed to remove {}: {}", self.path.display(), e);
        }
        info!("Placeholder listener closed: {}", self.path.display());
    }
}

async fn accept_loop(
    listener: UnixListener,
    closing: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, _)) => {
                    conns.spawn(drain(stream, shutdown_rx.clone()));
                }
                Err(e) if closing.load(Ordering::SeqCst) => {
                    debug!("Placeholder accept after close: {}", e);
                    break;
                }
                Err(e) => error!("Placeholder accept error: {}", e),
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    drop(listener);
    while conns.join_next().await.is_some() {}
}

/// Read and discard until the peer hangs up or the listener shuts down.
async fn drain(mut stream: UnixStream, mut shutdown_rx: watch::Receiver<bool>) {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            res = stream.read(&mut buf) => match res {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Placeholder connection error: {}", e);
                    return;
                }
            },
            _ = shutdown_rx.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_placeholder_path() {
        assert_eq!(
            placeholder_path(Path::new("/var/run/kubevirt/virtiofs-containers/disk.sock")),
            PathBuf::from("/var/run/kubevirt/virtiofs-containers/disk.sock.placeholder")
        );
    }

    #[tokio::test]
    async fn test_accepts_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = placeholder_path(&dir.path().join("fs.sock"));
        let listener = PlaceholderListener::bind(path.clone()).unwrap();
        assert!(path.exists());

        let mut conn = UnixStream::connect(&path).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        drop(conn);

        let mut conn = UnixStream::connect(&path).await.unwrap();
        conn.write_all(b"still here").await.unwrap();

        listener.close().await;
        assert!(!path.exists());
        assert!(UnixStream::connect(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_close_drops_open_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = placeholder_path(&dir.path().join("fs.sock"));
        let listener = PlaceholderListener::bind(path.clone()).unwrap();

        let mut conn = UnixStream::connect(&path).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        // let the accept loop pick the connection up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        listener.close().await;

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(std::time::Duration::from_secs(2), conn.read(&mut buf))
            .await
            .expect("connection still open after close");
        // EOF or a reset both mean the server side is gone
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.sock.placeholder");
        std::fs::write(&path, "stale").unwrap();

        let listener = PlaceholderListener::bind(path.clone()).unwrap();
        UnixStream::connect(&path).await.unwrap();
        listener.close().await;
    }
}
