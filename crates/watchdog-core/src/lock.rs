//! Single-run guard for overlapping scheduler invocations.
//!
//! Uses an `fs2` advisory lock on `<state_dir>/watchdog.lock`. The lock is
//! released when the [`RunLock`] drops or the process dies, so a killed run
//! never leaves a stale lock behind.

use crate::error::Result;
use crate::{io, paths};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without blocking. `Ok(None)` means another run holds it.
    pub fn try_acquire(state_dir: &Path) -> Result<Option<Self>> {
        io::ensure_dir(state_dir)?;
        let path = paths::lock_path(state_dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
