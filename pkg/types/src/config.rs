use serde::{Deserialize, Serialize};
use std::path::Path;

use pkg_constants::paths::DEFAULT_VIRT_SHARE_DIR;
use pkg_constants::timing::{
    DEFAULT_GRACE_PERIOD_SECS, DEFAULT_HYPERVISOR_START_TIMEOUT_SECS,
    DEFAULT_WATCHDOG_INTERVAL_SECS,
};

/// Launcher configuration file (YAML).
///
/// Example `launcher.yaml`:
/// ```yaml
/// virt-share-dir: /var/run/kubevirt
/// grace-period-seconds: 45
/// qemu-timeout-seconds: 300
/// watchdog-interval-seconds: 10
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfigFile {
    #[serde(default, alias = "virt-share-dir")]
    pub virt_share_dir: Option<String>,
    #[serde(default, alias = "grace-period-seconds")]
    pub grace_period_seconds: Option<u64>,
    #[serde(default, alias = "qemu-timeout-seconds")]
    pub qemu_timeout_seconds: Option<u64>,
    #[serde(default, alias = "watchdog-interval-seconds")]
    pub watchdog_interval_seconds: Option<u64>,
}

/// Launcher tunables after merging CLI flags, the config file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSettings {
    pub virt_share_dir: String,
    pub grace_period_seconds: u64,
    pub qemu_timeout_seconds: u64,
    pub watchdog_interval_seconds: u64,
}

impl LauncherConfigFile {
    /// Merge with CLI overrides. Precedence: CLI > config file > defaults.
    pub fn merge(self, cli: LauncherConfigFile) -> LauncherSettings {
        LauncherSettings {
            virt_share_dir: cli
                .virt_share_dir
                .or(self.virt_share_dir)
                .unwrap_or_else(|| DEFAULT_VIRT_SHARE_DIR.to_string()),
            grace_period_seconds: cli
                .grace_period_seconds
                .or(self.grace_period_seconds)
                .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
            qemu_timeout_seconds: cli
                .qemu_timeout_seconds
                .or(self.qemu_timeout_seconds)
                .unwrap_or(DEFAULT_HYPERVISOR_START_TIMEOUT_SECS),
            watchdog_interval_seconds: cli
                .watchdog_interval_seconds
                .or(self.watchdog_interval_seconds)
                .unwrap_or(DEFAULT_WATCHDOG_INTERVAL_SECS),
        }
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(
    path: impl AsRef<Path>,
) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path.as_ref()) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
