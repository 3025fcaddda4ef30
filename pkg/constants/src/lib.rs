//! Centralized constants for the VM pod supervisors.
//!
//! Paths in here are a contract with the node-level controller that reads
//! the watchdog and trigger files, so change them in lockstep with it.

pub mod hypervisor;
pub mod paths;
pub mod sidecar;
pub mod timing;
