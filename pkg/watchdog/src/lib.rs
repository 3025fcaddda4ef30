//! Filesystem protocols shared between a VM's launcher and the node handler.
//!
//! Two kinds of per-VM files live under the share directory:
//!
//! - **watchdog files** (`<share>/watchdog-files/<namespace>_<name>`): the
//!   launcher refreshes their mtime; a stale file means the VM is dead.
//! - **graceful shutdown triggers**
//!   (`<share>/graceful-shutdown-trigger/<namespace>_<name>`): zero-byte
//!   markers whose existence means a shutdown was requested.
//!
//! Nothing here keeps in-memory state between calls, so writers and readers
//! in different containers only coordinate through the filesystem.

pub mod domain;
pub mod heartbeat;
pub mod trigger;

pub use domain::{DomainKey, initialize_directories};
pub use heartbeat::Heartbeat;
