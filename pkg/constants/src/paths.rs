//! Filesystem path constants.

// ─── Shared directories ───────────────────────────────────────────────────

/// Default base directory shared between the launcher and the node handler.
pub const DEFAULT_VIRT_SHARE_DIR: &str = "/var/run/kubevirt";

/// Sub-directory of the share dir holding one heartbeat file per VM.
pub const WATCHDOG_DIR_NAME: &str = "watchdog-files";

/// Sub-directory of the share dir holding graceful shutdown marker files.
pub const GRACEFUL_SHUTDOWN_TRIGGER_DIR_NAME: &str = "graceful-shutdown-trigger";

/// Separator between namespace and name in per-VM file names.
pub const DOMAIN_KEY_SEPARATOR: char = '_';

// ─── Container disks ──────────────────────────────────────────────────────

/// Default directory where container disk sockets are exposed.
pub const DEFAULT_CONTAINER_DISK_DIR: &str = "/var/run/kubevirt/container-disks";

/// Extension of the socket files removed from the container disk dir on exit.
pub const CONTAINER_DISK_SOCKET_EXT: &str = "sock";

// ─── Process table ────────────────────────────────────────────────────────

/// Root of the process table.
pub const PROC_ROOT: &str = "/proc";

// ─── Launcher ─────────────────────────────────────────────────────────────

/// Default YAML config file for the launcher (missing file ⇒ defaults).
pub const DEFAULT_LAUNCHER_CONFIG: &str = "/etc/kubevirt/launcher.yaml";
