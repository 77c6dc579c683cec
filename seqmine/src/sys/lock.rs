//! Folder locks for cross-process coordination.
//!
//! A `FolderLock` is an exclusive lock on a well-known file inside the
//! protected directory, acquired before mutating shared state (the corpus,
//! the stats directory). Acquisition blocks without a timeout; the lock is
//! released on drop. Stale locks from dead processes are broken after a
//! grace period.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::SetupError;
use crate::sys::{file, log};

const LOCK_FILE_NAME: &str = "lock";
const RETRY_DELAY_MS: u64 = 250;
const STALE_AFTER_DAYS: f64 = 1.0;

pub struct FolderLock {
    lock_path: PathBuf,
}

impl FolderLock {
    /// Acquire the lock for the given folder, blocking until it is free.
    pub fn acquire(folder: &Path) -> Result<FolderLock, SetupError> {
        std::fs::create_dir_all(folder)?;
        let lock_path = folder.join(LOCK_FILE_NAME);
        let mut reported = false;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut f) => {
                    let _ = writeln!(f, "{}", std::process::id());
                    return Ok(FolderLock { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if file::file_age_days(&lock_path) > STALE_AFTER_DAYS {
                        log::warn(&format!(
                            "Breaking stale lock {}",
                            lock_path.display()
                        ));
                        let _ = std::fs::remove_file(&lock_path);
                        continue;
                    }
                    if !reported {
                        log::debug(&format!(
                            "Waiting for lock {}",
                            lock_path.display()
                        ));
                        reported = true;
                    }
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for FolderLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            log::warn(&format!(
                "Cannot release lock {}: {}",
                self.lock_path.display(),
                e
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_and_released() {
        let dir = std::env::temp_dir().join(format!("seqmine-lock-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let _guard = FolderLock::acquire(&dir).expect("acquires");
            assert!(dir.join(LOCK_FILE_NAME).exists());
        }
        assert!(!dir.join(LOCK_FILE_NAME).exists());
        // reacquire after release works
        let _guard = FolderLock::acquire(&dir).expect("reacquires");
        drop(_guard);
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
