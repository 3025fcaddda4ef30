use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pkg_constants::timing::MONITOR_TICK_SECS;
use pkg_watchdog::trigger;

use crate::grace::GracePeriod;
use crate::procfs::{ProcError, ProcScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    WaitingForProcess,
    Tracking,
    GracePeriodArmed,
    Done,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::WaitingForProcess => write!(f, "WaitingForProcess"),
            MonitorState::Tracking => write!(f, "Tracking"),
            MonitorState::GracePeriodArmed => write!(f, "GracePeriodArmed"),
            MonitorState::Done => write!(f, "Done"),
        }
    }
}

/// Snapshot published on every state or pid change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub pid: Option<Pid>,
}

/// Why the monitor reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The tracked process disappeared.
    ProcessExited(Pid),
    /// The process never showed up within the start timeout.
    StartTimeout,
    /// A stop was requested and the grace period ran out before the process
    /// was ever found.
    GraceExpired,
}

/// The process being watched. `pid` is `None` until discovered.
#[derive(Debug, Clone)]
pub struct MonitoredProcess {
    pub pid: Option<Pid>,
    pub match_string: String,
    pub discovered_at: Option<Instant>,
}

type ShutdownCallback = Box<dyn FnMut(Pid) + Send>;

/// Polls the process table for one process and drives the graceful
/// shutdown protocol around it.
///
/// ```text
/// WaitingForProcess ──found──▶ Tracking ──stop request──▶ GracePeriodArmed
///        │                        │                            │
///        └─timeout / grace──▶ Done ◀──────process gone─────────┘
/// ```
///
/// Stop requests arrive on an mpsc channel. The first one creates the
/// trigger file and arms the grace period; later ones are ignored. Once the
/// grace period has expired the shutdown callback runs on every tick until
/// the process is gone.
pub struct ProcessMonitor {
    process: MonitoredProcess,
    state: MonitorState,
    grace: GracePeriod,
    start_timeout: Duration,
    trigger_file: PathBuf,
    tick: Duration,
    scanner: ProcScanner,
    on_grace_expired: ShutdownCallback,
    status_tx: watch::Sender<MonitorStatus>,
}

impl ProcessMonitor {
    /// A zero `start_timeout` waits for the process forever.
    ///
    /// If `trigger_file` already exists, a shutdown was requested before
    /// this monitor started and the grace period is armed right away.
    pub fn new(
        match_string: impl Into<String>,
        start_timeout: Duration,
        grace_period: Duration,
        trigger_file: PathBuf,
        on_grace_expired: impl FnMut(Pid) + Send + 'static,
    ) -> Self {
        let mut grace = GracePeriod::new(grace_period);
        if trigger::has_been_triggered(&trigger_file) {
            info!(
                "Graceful shutdown trigger {} already present, arming grace period",
                trigger_file.display()
            );
            grace.arm(Instant::now());
        }

        let (status_tx, _) = watch::channel(MonitorStatus {
            state: MonitorState::WaitingForProcess,
            pid: None,
        });

        Self {
            process: MonitoredProcess {
                pid: None,
                match_string: match_string.into(),
                discovered_at: None,
            },
            state: MonitorState::WaitingForProcess,
            grace,
            start_timeout,
            trigger_file,
            tick: Duration::from_secs(MONITOR_TICK_SECS),
            scanner: ProcScanner::new(),
            on_grace_expired: Box::new(on_grace_expired),
            status_tx,
        }
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_scanner(mut self, scanner: ProcScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn grace_period(&self) -> &GracePeriod {
        &self.grace
    }

    /// Run until `Done`. A closed stop channel just means no more requests.
    pub async fn run(mut self, mut stop_rx: mpsc::Receiver<Signal>) -> MonitorOutcome {
        let started = Instant::now();
        info!(
            "Monitoring for process matching {:?} (tick={:?}, start_timeout={:?}, grace={:?})",
            self.process.match_string,
            self.tick,
            self.start_timeout,
            self.grace.duration()
        );

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(outcome) = self.on_tick(started, Instant::now()) {
                        info!("Process monitor finished: {:?}", outcome);
                        return outcome;
                    }
                }
                req = stop_rx.recv(), if stop_open => match req {
                    Some(sig) => self.on_stop_request(sig, Instant::now()),
                    None => {
                        debug!("Stop request channel closed");
                        stop_open = false;
                    }
                },
            }
        }
    }

    fn on_tick(&mut self, started: Instant, now: Instant) -> Option<MonitorOutcome> {
        match self.state {
            MonitorState::WaitingForProcess => self.tick_waiting(started, now),
            MonitorState::Tracking | MonitorState::GracePeriodArmed => self.tick_tracking(now),
            MonitorState::Done => None,
        }
    }

    fn tick_waiting(&mut self, started: Instant, now: Instant) -> Option<MonitorOutcome> {
        match self.scanner.find(&self.process.match_string) {
            Ok(pid) => {
                info!(
                    "Found process {} matching {:?}",
                    pid, self.process.match_string
                );
                self.process.pid = Some(pid);
                self.process.discovered_at = Some(now);
                let next = if self.grace.is_armed() {
                    MonitorState::GracePeriodArmed
                } else {
                    MonitorState::Tracking
                };
                self.transition(next);
                return None;
            }
            Err(ProcError::NotFound(_)) => {}
            Err(e) => warn!("Process scan failed, retrying next tick: {}", e),
        }

        if !self.start_timeout.is_zero() && now.duration_since(started) > self.start_timeout {
            warn!(
                "No process matching {:?} appeared within {:?}",
                self.process.match_string, self.start_timeout
            );
            self.transition(MonitorState::Done);
            return Some(MonitorOutcome::StartTimeout);
        }
        if self.grace.is_expired(now) {
            info!("Grace period expired before the process was found");
            self.transition(MonitorState::Done);
            return Some(MonitorOutcome::GraceExpired);
        }
        None
    }

    fn tick_tracking(&mut self, now: Instant) -> Option<MonitorOutcome> {
        let pid = self.process.pid?;
        // a reused pid no longer carries the match string
        match self.scanner.matches(pid, &self.process.match_string) {
            Ok(false) => {
                info!("Process {} is gone", pid);
                self.process.pid = None;
                self.transition(MonitorState::Done);
                return Some(MonitorOutcome::ProcessExited(pid));
            }
            Ok(true) => {}
            // can't tell; keep tracking
            Err(e) => warn!("Liveness check for pid {} failed: {}", pid, e),
        }

        if self.grace.is_expired(now) {
            info!("Grace period expired, invoking final shutdown for pid {}", pid);
            (self.on_grace_expired)(pid);
        }
        None
    }

    fn on_stop_request(&mut self, sig: Signal, now: Instant) {
        if self.grace.is_armed() {
            debug!("Ignoring {:?}, grace period already armed", sig);
            return;
        }
        info!("Received {:?}, starting graceful shutdown", sig);
        if let Err(e) = trigger::initiate(&self.trigger_file) {
            error!(
                "Failed to create graceful shutdown trigger {}: {}",
                self.trigger_file.display(),
                e
            );
        }
        self.grace.arm(now);
        if self.state == MonitorState::Tracking {
            self.transition(MonitorState::GracePeriodArmed);
        }
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!("Process monitor: {} → {}", self.state, next);
        }
        self.state = next;
        let status = MonitorStatus {
            state: next,
            pid: self.process.pid,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::kill;
    use std::process::{Child, Command};
    use std::sync::{Arc, Mutex};

    const TICK: Duration = Duration::from_millis(100);

    fn spawn_sleep(base: u32) -> (Child, String) {
        let needle = format!("{}.{}", base, std::process::id() % 1_000_000);
        let child = Command::new("sleep").arg(&needle).spawn().unwrap();
        (child, needle)
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<MonitorStatus>,
        state: MonitorState,
    ) -> MonitorStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = *rx.borrow_and_update();
                if status.state == state {
                    return status;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    fn fake_proc(pid: &str, cmdline: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(pid)).unwrap();
        std::fs::write(dir.path().join(pid).join("cmdline"), cmdline).unwrap();
        dir
    }

    async fn run_until_exit(start_timeout: Duration, base: u32) {
        let dir = tempfile::tempdir().unwrap();
        let (mut child, needle) = spawn_sleep(base);
        let child_pid = Pid::from_raw(child.id() as i32);

        let monitor = ProcessMonitor::new(
            needle,
            start_timeout,
            Duration::from_secs(30),
            dir.path().join("trigger"),
            |_| {},
        )
        .with_tick_interval(TICK);
        let mut status = monitor.subscribe();
        let (_stop_tx, stop_rx) = mpsc::channel(10);
        let handle = tokio::spawn(monitor.run(stop_rx));

        let tracked = wait_for_state(&mut status, MonitorState::Tracking).await;
        assert_eq!(tracked.pid, Some(child_pid));

        child.kill().unwrap();
        child.wait().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::ProcessExited(child_pid));
        let last = *status.borrow();
        assert_eq!(last.state, MonitorState::Done);
        assert_eq!(last.pid, None);
    }

    #[tokio::test]
    async fn test_normal_shutdown() {
        run_until_exit(Duration::ZERO, 900001).await;
    }

    #[tokio::test]
    async fn test_normal_shutdown_with_start_timeout() {
        run_until_exit(Duration::from_secs(10), 900003).await;
    }

    #[test]
    fn test_reused_pid_counts_as_exited() {
        let proc_dir = fake_proc("3999001", b"/usr/libexec/qemu-kvm\0-name\0guest=ns_vm\0");
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ProcessMonitor::new(
            "guest=ns_vm",
            Duration::ZERO,
            Duration::from_secs(30),
            dir.path().join("trigger"),
            |_| {},
        )
        .with_scanner(ProcScanner::with_root(proc_dir.path()));
        let pid = Pid::from_raw(3999001);
        let started = Instant::now();

        assert_eq!(monitor.on_tick(started, started), None);
        assert_eq!(monitor.state(), MonitorState::Tracking);
        assert_eq!(monitor.on_tick(started, started + TICK), None);

        // same pid, different program
        std::fs::write(proc_dir.path().join("3999001").join("cmdline"), b"bash\0").unwrap();
        assert_eq!(
            monitor.on_tick(started, started + TICK * 2),
            Some(MonitorOutcome::ProcessExited(pid))
        );
        assert_eq!(monitor.state(), MonitorState::Done);
    }

    #[test]
    fn test_start_timeout_is_strict() {
        let proc_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_secs(5);
        let mut monitor = ProcessMonitor::new(
            "guest=ns_vm",
            timeout,
            Duration::from_secs(30),
            dir.path().join("trigger"),
            |_| {},
        )
        .with_scanner(ProcScanner::with_root(proc_dir.path()));
        let started = Instant::now();

        assert_eq!(monitor.on_tick(started, started + timeout), None);
        assert_eq!(monitor.state(), MonitorState::WaitingForProcess);
        assert_eq!(
            monitor.on_tick(started, started + timeout + Duration::from_nanos(1)),
            Some(MonitorOutcome::StartTimeout)
        );
        assert_eq!(monitor.state(), MonitorState::Done);
    }

    #[tokio::test]
    async fn test_start_timeout_without_process() {
        let dir = tempfile::tempdir().unwrap();
        let needle = format!("no-such-process-{}", std::process::id());
        let monitor = ProcessMonitor::new(
            needle,
            Duration::from_secs(1),
            Duration::from_secs(30),
            dir.path().join("trigger"),
            |_| {},
        );
        let (_stop_tx, stop_rx) = mpsc::channel(10);

        let begin = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(3), monitor.run(stop_rx))
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::StartTimeout);
        assert!(begin.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_grace_callback_fires() {
        let dir = tempfile::tempdir().unwrap();
        let trigger_file = dir.path().join("trigger");
        let (child, needle) = spawn_sleep(900002);
        let child_pid = Pid::from_raw(child.id() as i32);
        let child = Arc::new(Mutex::new(child));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let cb_calls = calls.clone();
        let cb_child = child.clone();
        let monitor = ProcessMonitor::new(
            needle,
            Duration::from_secs(10),
            Duration::from_millis(300),
            trigger_file.clone(),
            move |pid| {
                cb_calls.lock().unwrap().push(pid);
                let _ = kill(pid, Signal::SIGKILL);
                let _ = cb_child.lock().unwrap().wait();
            },
        )
        .with_tick_interval(TICK);
        let mut status = monitor.subscribe();
        let (stop_tx, stop_rx) = mpsc::channel(10);
        let handle = tokio::spawn(monitor.run(stop_rx));

        wait_for_state(&mut status, MonitorState::Tracking).await;
        stop_tx.send(Signal::SIGTERM).await.unwrap();
        stop_tx.send(Signal::SIGINT).await.unwrap();
        let armed = wait_for_state(&mut status, MonitorState::GracePeriodArmed).await;
        assert_eq!(armed.pid, Some(child_pid));
        assert!(trigger::has_been_triggered(&trigger_file));

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::ProcessExited(child_pid));
        let calls = calls.lock().unwrap();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|p| *p == child_pid));
    }

    #[tokio::test]
    async fn test_grace_expires_without_process() {
        let dir = tempfile::tempdir().unwrap();
        let trigger_file = dir.path().join("trigger");
        let needle = format!("never-started-{}", std::process::id());
        let monitor = ProcessMonitor::new(
            needle,
            Duration::ZERO,
            Duration::from_millis(200),
            trigger_file.clone(),
            |_| panic!("no process to shut down"),
        )
        .with_tick_interval(TICK);
        let (stop_tx, stop_rx) = mpsc::channel(10);
        let handle = tokio::spawn(monitor.run(stop_rx));

        stop_tx.send(Signal::SIGTERM).await.unwrap();
        drop(stop_tx);

        let outcome = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::GraceExpired);
        assert!(trigger::has_been_triggered(&trigger_file));
    }

    #[tokio::test]
    async fn test_existing_trigger_arms_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let trigger_file = dir.path().join("trigger");
        trigger::initiate(&trigger_file).unwrap();

        let monitor = ProcessMonitor::new(
            format!("never-started-{}", std::process::id()),
            Duration::ZERO,
            Duration::from_millis(200),
            trigger_file,
            |_| {},
        )
        .with_tick_interval(TICK);
        assert!(monitor.grace_period().is_armed());

        let (_stop_tx, stop_rx) = mpsc::channel(10);
        let outcome = tokio::time::timeout(Duration::from_secs(3), monitor.run(stop_rx))
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::GraceExpired);
    }

    #[tokio::test]
    async fn test_scan_errors_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ProcessMonitor::new(
            "qemu",
            Duration::from_millis(300),
            Duration::from_secs(30),
            dir.path().join("trigger"),
            |_| {},
        )
        .with_tick_interval(TICK)
        .with_scanner(ProcScanner::with_root(dir.path().join("no-proc-here")));
        let (_stop_tx, stop_rx) = mpsc::channel(10);

        let outcome = tokio::time::timeout(Duration::from_secs(3), monitor.run(stop_rx))
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::StartTimeout);
    }
}
