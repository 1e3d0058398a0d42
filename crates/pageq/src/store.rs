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

//! Queue directory layout.
//!
//! A queue directory contains:
//!
//! ```text
//! queue_data/
//! ├── queue.lock        advisory process lock
//! ├── checkpoint.head   writer progress checkpoint
//! ├── page.1            page files, monotonically numbered
//! ├── page.2
//! ├── checkpoint.1      per-page ack checkpoints
//! └── checkpoint.2
//! ```
//!
//! Page numbers never restart; a reopened queue continues from the highest
//! number present. Files with unrecognized names are ignored.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::Result;

const PAGE_PREFIX: &str = "page.";
const CHECKPOINT_PREFIX: &str = "checkpoint.";
const HEAD_CHECKPOINT_FILE: &str = "checkpoint.head";

/// Resolves file paths inside one queue directory.
#[derive(Debug, Clone)]
pub(crate) struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    /// Open (creating if needed) the queue directory.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, number: u64) -> PathBuf {
        self.dir.join(format!("{PAGE_PREFIX}{number}"))
    }

    pub fn checkpoint_path(&self, number: u64) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_PREFIX}{number}"))
    }

    pub fn head_checkpoint_path(&self) -> PathBuf {
        self.dir.join(HEAD_CHECKPOINT_FILE)
    }

    /// Page numbers present on disk, ascending.
    pub fn enumerate_pages(&self) -> Result<Vec<u64>> {
        self.enumerate(PAGE_PREFIX)
    }

    /// Per-page checkpoint numbers present on disk, ascending. Does not
    /// include the head checkpoint.
    pub fn enumerate_checkpoints(&self) -> Result<Vec<u64>> {
        self.enumerate(CHECKPOINT_PREFIX)
    }

    fn enumerate(&self, prefix: &str) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(prefix) else {
                continue;
            };
            if let Ok(number) = suffix.parse::<u64>() {
                numbers.push(number);
            }
        }

        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Delete a fully acknowledged page.
    ///
    /// The page file goes first: if the process dies between the two
    /// deletions, recovery finds a checkpoint without its page and discards
    /// it, rather than a page whose acknowledgements were lost.
    pub fn delete_page(&self, number: u64) -> Result<()> {
        let page_path = self.page_path(number);
        if page_path.exists() {
            fs::remove_file(&page_path)?;
        }

        let checkpoint_path = self.checkpoint_path(number);
        if checkpoint_path.exists() {
            fs::remove_file(&checkpoint_path)?;
        }

        info!(page = number, "Reclaimed fully acknowledged page");
        Ok(())
    }

    /// Remove checkpoint files whose page no longer exists. Runs once during
    /// recovery.
    pub fn remove_orphan_checkpoints(&self) -> Result<()> {
        let pages = self.enumerate_pages()?;
        for number in self.enumerate_checkpoints()? {
            if !pages.contains(&number) {
                debug!(page = number, "Removing checkpoint for deleted page");
                fs::remove_file(self.checkpoint_path(number))?;
            }
        }
        Ok(())
    }
}
