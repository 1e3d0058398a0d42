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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Filesystem I/O failure. Fatal for writes: the queue cannot proceed
    /// without a writable page.
    #[snafu(context(false))]
    #[snafu(display("IO error: {source}"))]
    Io { source: io::Error },

    /// Memory mapping operation failed.
    #[snafu(display("Mmap operation failed: {message}"))]
    Mmap { message: String },

    /// Checksum mismatch or truncated record detected in a page.
    ///
    /// During normal reads and recovery this means "no more readable data in
    /// this page", not a fatal condition.
    #[snafu(display("Corrupt record in page {page} at offset {offset}"))]
    CorruptPage { page: u64, offset: u64 },

    /// A checkpoint file failed validation (magic, version, or checksum).
    #[snafu(display("Corrupt checkpoint: {reason}"))]
    CheckpointCorrupted { reason: String },

    /// On-disk format version is newer than this build understands.
    #[snafu(display("Unsupported on-disk format version {version}"))]
    UnsupportedVersion { version: u32 },

    /// Operation issued after the queue was closed.
    #[snafu(display("Queue is closed"))]
    Closed,

    /// Non-blocking write refused because the queue is at capacity.
    #[snafu(display("Queue is at capacity"))]
    CapacityExceeded,

    /// Another process holds the queue directory lock.
    #[snafu(display("Queue directory is locked by another process: {}", path.display()))]
    LockConflict { path: PathBuf },

    /// Zero-length payloads cannot be stored: a zero length prefix marks the
    /// end of readable data in a page.
    #[snafu(display("Item payload must not be empty"))]
    EmptyItem,

    /// Payload exceeds the u32 length prefix or the queue's configured byte
    /// capacity; it could never be stored and delivered intact.
    #[snafu(display("Item of {size} bytes exceeds the maximum payload size of {limit} bytes"))]
    ItemTooLarge { size: usize, limit: u64 },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, Error>;
