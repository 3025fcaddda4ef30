//! virt-launcher: runs inside every VM pod.
//!
//! Invoked once as the parent, which re-executes itself with `--no-fork`
//! and supervises that child. The child tracks the hypervisor process,
//! keeps the watchdog file fresh and handles graceful shutdown.

mod launcher;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use pkg_constants::paths::{DEFAULT_CONTAINER_DISK_DIR, DEFAULT_LAUNCHER_CONFIG};
use pkg_supervisor::proxy::SidecarProxy;
use pkg_supervisor::{Cleanup, ForkSupervisor, logging};
use pkg_types::config::LauncherConfigFile;
use pkg_types::verbosity::DEFAULT_VERBOSITY;

#[derive(Parser, Debug)]
#[command(name = "virt-launcher", about = "VM pod launcher and supervisor")]
struct Cli {
    /// Directory holding container disk sockets, cleaned after the child exits
    #[arg(long, default_value = DEFAULT_CONTAINER_DISK_DIR)]
    container_disk_dir: PathBuf,

    /// Run as the launcher itself instead of supervising a re-executed copy
    #[arg(long)]
    no_fork: bool,

    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_LAUNCHER_CONFIG)]
    config: PathBuf,

    /// Namespace of the VM
    #[arg(long)]
    namespace: String,

    /// Name of the VM
    #[arg(long)]
    name: String,

    /// UID of the VM, written into the watchdog file
    #[arg(long)]
    uid: String,

    /// Shared directory for watchdog and shutdown trigger files
    #[arg(long)]
    virt_share_dir: Option<String>,

    /// Seconds between a shutdown request and the hard kill
    #[arg(long)]
    grace_period_seconds: Option<u64>,

    /// Seconds to wait for the hypervisor process to appear (0 = forever)
    #[arg(long)]
    qemu_timeout_seconds: Option<u64>,

    /// Seconds between watchdog file refreshes
    #[arg(long)]
    watchdog_interval_seconds: Option<u64>,

    /// Command-line substring identifying the hypervisor process
    /// [default: guest=<namespace>_<name>]
    #[arg(long)]
    hypervisor_match: Option<String>,

    /// Log verbosity
    #[arg(short = 'v', long = "v", default_value_t = DEFAULT_VERBOSITY)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbosity);

    let result = if cli.no_fork {
        launcher::run(launcher::LauncherOptions {
            namespace: cli.namespace,
            name: cli.name,
            uid: cli.uid,
            config_path: cli.config,
            overrides: LauncherConfigFile {
                virt_share_dir: cli.virt_share_dir,
                grace_period_seconds: cli.grace_period_seconds,
                qemu_timeout_seconds: cli.qemu_timeout_seconds,
                watchdog_interval_seconds: cli.watchdog_interval_seconds,
            },
            hypervisor_match: cli.hypervisor_match,
        })
        .await
    } else {
        run_parent(cli.container_disk_dir).await
    };

    match result {
        Ok(code) => {
            info!("Exiting with code {}", code);
            ExitCode::from(code as u8)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_parent(container_disk_dir: PathBuf) -> anyhow::Result<i32> {
    let args: Vec<_> = std::env::args_os().skip(1).collect();
    let cleanup = Cleanup::new(container_disk_dir, Some(SidecarProxy::new()?));
    ForkSupervisor::new(args, cleanup)?.run().await
}
