//! File locking for build/query mutual exclusion.
//!
//! Uses flock() for advisory locking on the data directory: a build holds
//! the exclusive lock for its whole run, while search/info take a shared
//! lock only while loading the artifact pair. In-memory queries after
//! load need no lock. Both sides fail fast instead of blocking so the CLI
//! can print something actionable.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock file name placed in the data directory
const LOCK_FILE_NAME: &str = "lookalike.lock";

/// A held lock that releases on drop.
pub struct IndexLock {
    #[allow(dead_code)]
    file: File,
}

impl IndexLock {
    /// Exclusive lock for a build. Fails with `WouldBlock` if any build
    /// or loading search holds the lock.
    pub fn try_exclusive(base_path: &Path) -> io::Result<Self> {
        let file = Self::open_lock_file(base_path)?;
        Self::flock(&file, true)?;
        Ok(IndexLock { file })
    }

    /// Shared lock for loading the artifact pair. Fails with `WouldBlock`
    /// while a build holds the exclusive lock.
    pub fn try_shared(base_path: &Path) -> io::Result<Self> {
        let file = Self::open_lock_file(base_path)?;
        Self::flock(&file, false)?;
        Ok(IndexLock { file })
    }

    fn open_lock_file(base_path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_path.join(LOCK_FILE_NAME))
    }

    #[cfg(unix)]
    fn flock(file: &File, exclusive: bool) -> io::Result<()> {
        let operation = if exclusive {
            libc::LOCK_EX | libc::LOCK_NB
        } else {
            libc::LOCK_SH | libc::LOCK_NB
        };
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "index is locked by another lookalike process",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn flock(_file: &File, _exclusive: bool) -> io::Result<()> {
        // No locking on non-Unix platforms (yet); compiles but provides
        // no protection.
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for IndexLock {
    fn drop(&mut self) {
        // Release the lock - ignore errors on drop
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}
