use nix::sys::signal::{Signal, kill};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use pkg_constants::hypervisor::HYPERVISOR_GUEST_NAME_PREFIX;
use pkg_monitor::{MonitorOutcome, ProcessMonitor};
use pkg_supervisor::signals;
use pkg_types::config::{LauncherConfigFile, load_config_file};
use pkg_watchdog::{DomainKey, Heartbeat, heartbeat, initialize_directories, trigger};

pub struct LauncherOptions {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub config_path: PathBuf,
    pub overrides: LauncherConfigFile,
    pub hypervisor_match: Option<String>,
}

/// Match string for the hypervisor of `key`: the explicit one if given,
/// otherwise the `guest=<namespace>_<name>` argument the hypervisor is
/// started with. Our own arguments never contain it.
pub fn hypervisor_match(explicit: Option<String>, key: &DomainKey) -> String {
    explicit.unwrap_or_else(|| format!("{}{}", HYPERVISOR_GUEST_NAME_PREFIX, key.file_name()))
}

/// The `--no-fork` role: watch the hypervisor until it is gone.
pub async fn run(opts: LauncherOptions) -> anyhow::Result<i32> {
    let file_cfg: LauncherConfigFile = load_config_file(&opts.config_path)?;
    let settings = file_cfg.merge(opts.overrides);
    info!("Config file: {}", opts.config_path.display());

    let base_dir = PathBuf::from(&settings.virt_share_dir);
    initialize_directories(&base_dir)?;

    let key = DomainKey::new(opts.namespace, opts.name);
    let match_string = hypervisor_match(opts.hypervisor_match, &key);
    info!("Starting launcher for {}", key);
    info!("  Share dir:     {}", base_dir.display());
    info!("  Grace period:  {}s", settings.grace_period_seconds);
    info!("  Start timeout: {}s", settings.qemu_timeout_seconds);
    info!("  Match:         {}", match_string);

    let watchdog_file = key.watchdog_file(&base_dir);
    let trigger_file = key.trigger_file(&base_dir);
    let heartbeat = Heartbeat::start(
        watchdog_file.clone(),
        opts.uid,
        Duration::from_secs(settings.watchdog_interval_seconds),
    )?;

    let stop_rx = signals::register(&[Signal::SIGTERM, Signal::SIGINT])?;
    let monitor = ProcessMonitor::new(
        match_string.clone(),
        Duration::from_secs(settings.qemu_timeout_seconds),
        Duration::from_secs(settings.grace_period_seconds),
        trigger_file.clone(),
        |pid| {
            warn!("Killing hypervisor process {}", pid);
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                warn!("Failed to kill hypervisor process {}: {}", pid, e);
            }
        },
    );
    let outcome = monitor.run(stop_rx).await;

    heartbeat.stop().await;
    if let Err(e) = heartbeat::remove(&watchdog_file) {
        warn!("Failed to remove watchdog file {}: {}", watchdog_file.display(), e);
    }
    if let Err(e) = trigger::clear(&trigger_file) {
        warn!("Failed to clear shutdown trigger {}: {}", trigger_file.display(), e);
    }

    match outcome {
        MonitorOutcome::ProcessExited(_) | MonitorOutcome::GraceExpired => Ok(0),
        MonitorOutcome::StartTimeout => anyhow::bail!(
            "hypervisor process matching {:?} did not start within {}s",
            match_string,
            settings.qemu_timeout_seconds
        ),
    }
}
