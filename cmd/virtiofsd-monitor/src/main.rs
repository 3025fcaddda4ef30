//! virtiofsd-monitor: runs virtiofsd as a sidecar and supervises it.

use clap::Parser;
use nix::unistd::getuid;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use pkg_constants::sidecar::VIRTIOFSD_BINARY;
use pkg_supervisor::{
    ChownOwnershipManager, NoopOwnershipManager, OwnershipManager, SidecarConfig, SidecarMonitor,
    Termination, logging,
};
use pkg_types::verbosity::DEFAULT_VERBOSITY;

#[derive(Parser, Debug)]
#[command(name = "virtiofsd-monitor", about = "Supervise a virtiofsd sidecar")]
struct Cli {
    /// vhost-user socket virtiofsd listens on
    #[arg(long)]
    socket_path: PathBuf,

    /// Volume to share, mounted at /<volume-name>
    #[arg(long)]
    volume_name: String,

    /// Keep the container running if virtiofsd fails
    #[arg(long)]
    keep_after_failure: bool,

    /// virtiofsd binary
    #[arg(long, default_value = VIRTIOFSD_BINARY)]
    virtiofsd_path: PathBuf,

    /// Log verbosity
    #[arg(short = 'v', long = "v", default_value_t = DEFAULT_VERBOSITY)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbosity);

    // Only root can hand the socket to the qemu user.
    let ownership: Arc<dyn OwnershipManager> = if getuid().is_root() {
        Arc::new(ChownOwnershipManager::default())
    } else {
        Arc::new(NoopOwnershipManager)
    };

    let config = SidecarConfig {
        socket_path: cli.socket_path,
        volume_name: cli.volume_name,
        keep_after_failure: cli.keep_after_failure,
        virtiofsd_path: cli.virtiofsd_path,
    };

    match SidecarMonitor::new(config, ownership).run().await {
        Ok(Termination::Exited(code)) => {
            info!("virtiofsd exited with code {}", code);
            ExitCode::from(code as u8)
        }
        Ok(Termination::KeptAlive(code)) => {
            info!(
                "virtiofsd failed with code {}, keeping container alive",
                code
            );
            std::future::pending::<ExitCode>().await
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
