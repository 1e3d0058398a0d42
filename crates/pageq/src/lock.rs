// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory lock on the queue directory.
//!
//! Exactly one process may own a queue directory at a time. The lock is an
//! OS-level advisory lock on a dedicated file, so it is released even if the
//! owning process dies without running shutdown.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tracing::debug;

use crate::{Result, error::LockConflictSnafu};

const LOCK_FILE: &str = "queue.lock";

/// Holds the exclusive lock on a queue directory for its lifetime.
pub(crate) struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the exclusive directory lock, failing immediately with
    /// [`Error::LockConflict`](crate::Error::LockConflict) if another process
    /// holds it.
    pub fn acquire<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return LockConflictSnafu { path }.fail();
        }

        debug!(path = ?path, "Acquired queue directory lock");
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = ?self.path, "Released queue directory lock");
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::Error;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();

        let lock = DirLock::acquire(temp_dir.path()).unwrap();
        drop(lock);

        // Re-acquirable after release.
        let _lock = DirLock::acquire(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_conflict_detected() {
        let temp_dir = TempDir::new().unwrap();

        let _held = DirLock::acquire(temp_dir.path()).unwrap();
        let second = DirLock::acquire(temp_dir.path());

        assert!(matches!(second, Err(Error::LockConflict { .. })));
    }
}
