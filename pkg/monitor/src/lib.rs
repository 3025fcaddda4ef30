//! Hypervisor process tracking.
//!
//! - [`procfs`]: scan the process table by command-line substring
//! - [`grace`]: the armed-once grace period
//! - [`monitor`]: the polling state machine around a single process
//! - [`orphan`]: find and terminate a hypervisor left behind by a dead launcher

pub mod grace;
pub mod monitor;
pub mod orphan;
pub mod procfs;

pub use grace::GracePeriod;
pub use monitor::{MonitorOutcome, MonitorState, MonitorStatus, ProcessMonitor};
pub use orphan::OrphanReaper;
pub use procfs::{ProcError, ProcScanner};
