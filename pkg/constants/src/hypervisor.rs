//! Hypervisor process naming.

/// Command-line fragments identifying a hypervisor process, tried in order
/// when hunting orphans. Distributions ship either the `qemu-kvm` wrapper
/// or the upstream `qemu-system-<arch>` binaries.
pub const HYPERVISOR_PROCESS_NAMES: &[&str] = &["/usr/libexec/qemu-kvm", "qemu-system"];

/// Prefix of the hypervisor's `-name guest=<namespace>_<name>` argument.
/// The launcher matches on it by default.
pub const HYPERVISOR_GUEST_NAME_PREFIX: &str = "guest=";

/// Flag appended to the re-executed launcher so it knows it is the child.
pub const NO_FORK_FLAG: &str = "--no-fork";

/// Linux capability number of CAP_NET_BIND_SERVICE.
pub const CAP_NET_BIND_SERVICE: u32 = 10;
