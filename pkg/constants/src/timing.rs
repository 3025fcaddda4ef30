//! Timing constants for the supervision loops.

/// Cadence of the process monitor's liveness tick.
pub const MONITOR_TICK_SECS: u64 = 1;

/// Default grace period between a shutdown request and forced intervention.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Default time the launcher waits for the hypervisor to show up (0 disables).
pub const DEFAULT_HYPERVISOR_START_TIMEOUT_SECS: u64 = 240;

/// Default interval between watchdog heartbeat refreshes.
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 10;

/// How long an orphaned hypervisor gets to disappear after SIGTERM.
pub const ORPHAN_TERMINATION_TIMEOUT_SECS: u64 = 10;

/// Poll interval while waiting for an orphan to disappear.
pub const ORPHAN_POLL_INTERVAL_MS: u64 = 1000;

/// Attempts made to fix ownership of the sidecar's control socket.
pub const SOCKET_OWNERSHIP_ATTEMPTS: u32 = 10;

/// Interval between socket ownership attempts.
pub const SOCKET_OWNERSHIP_INTERVAL_SECS: u64 = 1;

/// Capacity of the queue between signal listeners and the supervisor.
pub const SIGNAL_QUEUE_CAPACITY: usize = 10;

/// How long the supervisor waits for the reaper after its own wait failed.
pub const EXIT_STATUS_SETTLE_SECS: u64 = 5;
