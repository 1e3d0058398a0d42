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

//! Background reclamation of fully acknowledged pages.
//!
//! Deletion happens off the ack path so acknowledgements never wait on the
//! filesystem. A page that fails to delete stays on disk; recovery treats a
//! fully acked page as reclaimable again, so nothing is lost by skipping it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, error, info};

use crate::{Result, store::PageStore};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the reclaimer thread; dropping after [`Reclaimer::shutdown`] joins it.
pub(crate) struct Reclaimer {
    sender:   Sender<u64>,
    shutdown: Arc<AtomicBool>,
    handle:   Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn start(store: PageStore) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pageq-reclaim".to_string())
            .spawn(move || run(&store, &receiver, &worker_shutdown))?;

        Ok(Self {
            sender,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Queue a page for deletion. Silently dropped after shutdown.
    pub fn submit(&self, page_number: u64) {
        let _ = self.sender.send(page_number);
    }

    /// Stop the worker after it drains pending deletions, then join it.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(store: &PageStore, receiver: &Receiver<u64>, shutdown: &Arc<AtomicBool>) {
    debug!("Page reclaimer started");

    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(page_number) => {
                if let Err(e) = store.delete_page(page_number) {
                    error!(page = page_number, error = %e, "Failed to reclaim page");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Drain anything submitted before the shutdown flag was observed.
    while let Ok(page_number) = receiver.try_recv() {
        if let Err(e) = store.delete_page(page_number) {
            error!(page = page_number, error = %e, "Failed to reclaim page");
        }
    }

    info!("Page reclaimer stopped");
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_reclaims_submitted_pages() {
        let temp_dir = TempDir::new().unwrap();
        let store = PageStore::open(temp_dir.path()).unwrap();

        File::create(store.page_path(1)).unwrap();
        File::create(store.checkpoint_path(1)).unwrap();

        let mut reclaimer = Reclaimer::start(store.clone()).unwrap();
        reclaimer.submit(1);
        reclaimer.shutdown();

        assert!(!store.page_path(1).exists());
        assert!(!store.checkpoint_path(1).exists());
    }

    #[test]
    fn test_shutdown_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = PageStore::open(temp_dir.path()).unwrap();

        let mut reclaimer = Reclaimer::start(store).unwrap();
        reclaimer.shutdown();
        reclaimer.shutdown();
    }
}
