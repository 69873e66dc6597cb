//! Per-sandbox advisory lock around metadata mutation

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use tracing::warn;

use crate::error::{Result, StoreError};

/// Exclusive advisory lock on a sandbox's `.lock` file.
///
/// Held for the duration of a read-modify-write of `sandbox.json`. Released on drop.
#[derive(Debug)]
pub struct SandboxLock {
    file: File,
}

impl SandboxLock {
    /// Block until the lock at `path` is held
    pub fn acquire(id: &str, path: &Path) -> Result<Self> {
        let lock_err = |source| StoreError::Lock {
            id: id.to_string(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        Ok(Self { file })
    }
}

impl Drop for SandboxLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release sandbox lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let held = SandboxLock::acquire("abc", &path).unwrap();
        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
        FileExt::unlock(&other).unwrap();
    }
}
