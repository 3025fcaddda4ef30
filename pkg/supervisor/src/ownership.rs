use nix::unistd::{Gid, Uid, chown};
use std::io;
use std::path::Path;

use pkg_constants::sidecar::QEMU_USER_ID;

/// Hands a file over to the user the hypervisor runs as.
pub trait OwnershipManager: Send + Sync {
    fn set_file_ownership(&self, path: &Path) -> io::Result<()>;
}

/// `chown`s files to a fixed uid/gid (the qemu user by default).
#[derive(Debug, Clone, Copy)]
pub struct ChownOwnershipManager {
    uid: Uid,
    gid: Gid,
}

impl Default for ChownOwnershipManager {
    fn default() -> Self {
        Self::new(Uid::from_raw(QEMU_USER_ID), Gid::from_raw(QEMU_USER_ID))
    }
}

impl ChownOwnershipManager {
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self { uid, gid }
    }
}

impl OwnershipManager for ChownOwnershipManager {
    fn set_file_ownership(&self, path: &Path) -> io::Result<()> {
        chown(path, Some(self.uid), Some(self.gid)).map_err(io::Error::from)
    }
}

/// For deployments where the helper already runs as the right user.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOwnershipManager;

impl OwnershipManager for NoopOwnershipManager {
    fn set_file_ownership(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}
