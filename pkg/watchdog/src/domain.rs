use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};

use pkg_constants::paths::{
    DOMAIN_KEY_SEPARATOR, GRACEFUL_SHUTDOWN_TRIGGER_DIR_NAME, WATCHDOG_DIR_NAME,
};

/// Identity of a VM as used in per-VM file names: `<namespace>_<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey {
    pub namespace: String,
    pub name: String,
}

impl DomainKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// File name used under both the watchdog and the trigger directory.
    pub fn file_name(&self) -> String {
        format!("{}{}{}", self.namespace, DOMAIN_KEY_SEPARATOR, self.name)
    }

    /// Parse a file name back into a key. Namespaces cannot contain `_`, so
    /// the first separator splits the two halves.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (namespace, name) = file_name.split_once(DOMAIN_KEY_SEPARATOR)?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    /// `<base>/watchdog-files/<namespace>_<name>`
    pub fn watchdog_file(&self, base_dir: &Path) -> PathBuf {
        watchdog_dir(base_dir).join(self.file_name())
    }

    /// `<base>/graceful-shutdown-trigger/<namespace>_<name>`
    pub fn trigger_file(&self, base_dir: &Path) -> PathBuf {
        trigger_dir(base_dir).join(self.file_name())
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub fn watchdog_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(WATCHDOG_DIR_NAME)
}

pub fn trigger_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(GRACEFUL_SHUTDOWN_TRIGGER_DIR_NAME)
}

/// Create the watchdog and trigger directories under `base_dir`.
pub fn initialize_directories(base_dir: &Path) -> anyhow::Result<()> {
    for dir in [watchdog_dir(base_dir), trigger_dir(base_dir)] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create shared directory {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let key = DomainKey::new("default", "my_vm");
        assert_eq!(key.file_name(), "default_my_vm");
        assert_eq!(DomainKey::parse("default_my_vm"), Some(key));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(DomainKey::parse("noseparator"), None);
        assert_eq!(DomainKey::parse("_name"), None);
        assert_eq!(DomainKey::parse("ns_"), None);
    }

    #[test]
    fn test_paths() {
        let key = DomainKey::new("ns", "vm");
        let base = Path::new("/var/run/kubevirt");
        assert_eq!(
            key.watchdog_file(base),
            PathBuf::from("/var/run/kubevirt/watchdog-files/ns_vm")
        );
        assert_eq!(
            key.trigger_file(base),
            PathBuf::from("/var/run/kubevirt/graceful-shutdown-trigger/ns_vm")
        );
    }

    #[test]
    fn test_initialize_directories() {
        let dir = tempfile::tempdir().unwrap();
        initialize_directories(dir.path()).unwrap();
        assert!(watchdog_dir(dir.path()).is_dir());
        assert!(trigger_dir(dir.path()).is_dir());
        // second call is harmless
        initialize_directories(dir.path()).unwrap();
    }

    #[test]
    fn test_initialize_directories_fails_under_a_file() {
        let path = Path::new("/dev/null/impossible");
        assert!(initialize_directories(path).is_err());
    }
}
