//! Child process supervision for the launcher and its sidecars.
//!
//! Both entry points follow the same shape: register signal handlers, spawn
//! the child, race two ways of collecting its exit status, then clean up
//! whatever the child may have left behind.
//!
//! - [`fork`]: re-exec the launcher as a constrained child
//! - [`sidecar`]: run a helper (virtiofsd) next to the VM

pub mod caps;
pub mod child;
pub mod cleanup;
pub mod exit;
pub mod fork;
pub mod logging;
pub mod ownership;
pub mod placeholder;
pub mod proxy;
pub mod sidecar;
pub mod signals;

pub use child::supervise;
pub use cleanup::Cleanup;
pub use exit::{CollectedVia, ExitSlot, ExitStatus};
pub use fork::ForkSupervisor;
pub use ownership::{ChownOwnershipManager, NoopOwnershipManager, OwnershipManager};
pub use sidecar::{HelperCommand, SidecarConfig, SidecarMonitor, Termination};
