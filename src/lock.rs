//! Advisory process lock on the data directory.
//!
//! A `.library.lock` file holding the owner's pid guards against two syncs
//! mutating the same library at once. The lock is advisory only; `--force`
//! overrides it, and a pid that no longer maps to a live process is treated
//! as stale.

use std::path::{Path, PathBuf};

use crate::library::error::LibraryError;

pub const LOCK_FILE: &str = ".library.lock";

/// Held lock on a data directory. Release explicitly via [`LibraryLock::release`];
/// the top-level handler does so on every exit path, including interrupt.
#[derive(Debug)]
pub struct LibraryLock {
    path: PathBuf,
    pid: u32,
}

/// Whether a pid belongs to a live process. On Linux this is a `/proc`
/// lookup; elsewhere we assume live and leave the decision to `--force`.
fn pid_is_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        Path::new(&format!("/proc/{pid}")).exists()
    } else {
        true
    }
}

impl LibraryLock {
    /// Acquire the lock for the current process.
    ///
    /// Fails with [`LibraryError::Locked`] when another live process holds it
    /// and `force` is not set. A stale lock (dead pid) is overwritten with a
    /// warning.
    pub fn acquire(data_dir: &Path, force: bool) -> Result<Self, LibraryError> {
        let path = data_dir.join(LOCK_FILE);
        let pid = std::process::id();

        if let Some(holder) = read_lock_pid(&path)? {
            if holder != pid {
                if force {
                    tracing::warn!("Overriding library lock held by PID {}", holder);
                } else if !pid_is_alive(holder) {
                    tracing::warn!("Clearing stale library lock held by dead PID {}", holder);
                } else {
                    return Err(LibraryError::Locked { pid: holder });
                }
            }
        }

        std::fs::write(&path, pid.to_string()).map_err(|source| LibraryError::Io {
            context: format!("Unable to write lock file {}", path.display()),
            source,
        })?;
        tracing::debug!("Acquired library lock as PID {}", pid);
        Ok(Self { path, pid })
    }

    /// Release the lock, unlinking the lock file.
    ///
    /// Fails when the file is gone ([`LibraryError::NoLock`]) or when another
    /// pid took it over and `force` is not set.
    pub fn release(self, force: bool) -> Result<(), LibraryError> {
        match read_lock_pid(&self.path)? {
            None => Err(LibraryError::NoLock),
            Some(holder) if holder != self.pid && !force => {
                Err(LibraryError::Locked { pid: holder })
            }
            Some(_) => {
                std::fs::remove_file(&self.path).map_err(|source| LibraryError::Io {
                    context: format!("Unable to remove lock file {}", self.path.display()),
                    source,
                })?;
                tracing::debug!("Released library lock");
                Ok(())
            }
        }
    }
}

/// Read the pid recorded in the lock file, or `None` when absent.
/// An unparsable file counts as a lock held by an unknown (dead) process.
fn read_lock_pid(path: &Path) -> Result<Option<u32>, LibraryError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().parse::<u32>().unwrap_or(0))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LibraryError::Io {
            context: format!("Unable to read lock file {}", path.display()),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_own_pid() {
        let dir = tempdir().unwrap();
        let lock = LibraryLock::acquire(dir.path(), false).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        lock.release(false).unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn acquire_fails_when_held_by_live_pid() {
        let dir = tempdir().unwrap();
        // PID 1 is always alive on Linux.
        std::fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        let err = LibraryLock::acquire(dir.path(), false).unwrap_err();
        match err {
            LibraryError::Locked { pid } => assert_eq!(pid, 1),
            other => panic!("expected Locked, got {other:?}"),
        }
        // The lock file is untouched by the failed attempt.
        assert_eq!(
            std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap(),
            "1"
        );
    }

    #[test]
    fn force_overrides_live_lock() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        let lock = LibraryLock::acquire(dir.path(), true).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        lock.release(false).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        // No process can have pid 0; parse fallback also maps garbage to 0.
        std::fs::write(dir.path().join(LOCK_FILE), "0").unwrap();
        let lock = LibraryLock::acquire(dir.path(), false).unwrap();
        lock.release(false).unwrap();
    }

    #[test]
    fn release_without_lock_file_is_no_lock() {
        let dir = tempdir().unwrap();
        let lock = LibraryLock::acquire(dir.path(), false).unwrap();
        std::fs::remove_file(dir.path().join(LOCK_FILE)).unwrap();
        match lock.release(false) {
            Err(LibraryError::NoLock) => {}
            other => panic!("expected NoLock, got {other:?}"),
        }
    }

    #[test]
    fn release_of_foreign_lock_requires_force() {
        let dir = tempdir().unwrap();
        let lock = LibraryLock::acquire(dir.path(), false).unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        match lock.release(false) {
            Err(LibraryError::Locked { pid: 1 }) => {}
            other => panic!("expected Locked, got {other:?}"),
        }
        let lock = LibraryLock::acquire(dir.path(), true).unwrap();
        lock.release(true).unwrap();
    }
}
