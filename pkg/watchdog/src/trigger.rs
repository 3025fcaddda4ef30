//! Graceful shutdown trigger: a zero-byte marker file.

use std::io;
use std::path::Path;
use tracing::info;

/// Mark that a shutdown was requested. Succeeds if the marker already exists.
pub fn initiate(path: &Path) -> io::Result<()> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(_) => {
            info!("Graceful shutdown triggered: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn has_been_triggered(path: &Path) -> bool {
    path.exists()
}

/// Remove the marker. A missing marker is not an error.
pub fn clear(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_vm");

        assert!(!has_been_triggered(&path));
        for _ in 0..100 {
            initiate(&path).unwrap();
            assert!(has_been_triggered(&path));
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_initiate_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_vm");
        std::fs::write(&path, "left by someone else").unwrap();
        initiate(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "left by someone else");
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_vm");
        initiate(&path).unwrap();
        clear(&path).unwrap();
        assert!(!has_been_triggered(&path));
        clear(&path).unwrap();
    }

    #[test]
    fn test_initiate_fails_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("default_vm");
        assert!(initiate(&path).is_err());
    }
}
