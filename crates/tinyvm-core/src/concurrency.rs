use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Advisory exclusive lock over a build workspace, released on drop.
pub struct WorkspaceLock {
    lock_file: File,
}

impl WorkspaceLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Take the lock, failing immediately with [`CoreError::Locked`] if
    /// another build holds it.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        Self::try_acquire(lock_path)?
            .ok_or_else(|| CoreError::Locked(lock_path.display().to_string()))
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
