use anyhow::Context;
use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::debug;

use pkg_constants::timing::SIGNAL_QUEUE_CAPACITY;

/// Signals the supervisors care about.
pub const SUPERVISED_SIGNALS: &[Signal] = &[
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGCHLD,
];

/// Install handlers for `signals` and funnel them into one bounded queue.
///
/// Handlers are installed before this returns, so a child spawned afterwards
/// cannot exit unnoticed. One forwarding task runs per signal kind.
pub fn register(signals: &[Signal]) -> anyhow::Result<mpsc::Receiver<Signal>> {
    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    for &sig in signals {
        let mut stream = signal(SignalKind::from_raw(sig as i32))
            .with_context(|| format!("failed to register handler for {}", sig))?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!("Received {}", sig);
                if tx.send(sig).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(rx)
}
