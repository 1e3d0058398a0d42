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

//! Crash-consistent checkpoint records.
//!
//! Two kinds of checkpoint exist, both small binary records protected by a
//! trailing CRC32 and written via write-to-temp-file-then-atomic-rename so a
//! crash can never leave a partially written checkpoint in place:
//!
//! - **Head checkpoint** (`checkpoint.head`): writer-side progress — active
//!   page number, next sequence number, write offset.
//! - **Page checkpoint** (`checkpoint.<N>`): reader/ack-side progress for one
//!   page — first sequence, event count, end-of-page flag, and the sparse set
//!   of acknowledged sequence ranges.
//!
//! A checkpoint must always describe state at or behind what is on disk,
//! never ahead: callers flush page data before checkpointing it.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
    thread,
    time::Duration,
};

use crc32fast::Hasher;
use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    Result,
    error::{CheckpointCorruptedSnafu, Error, UnsupportedVersionSnafu},
};

/// Magic bytes identifying a head checkpoint: "QCHD"
pub(crate) const HEAD_MAGIC: [u8; 4] = *b"QCHD";

/// Magic bytes identifying a page checkpoint: "QCKP"
pub(crate) const PAGE_CHECKPOINT_MAGIC: [u8; 4] = *b"QCKP";

/// Current checkpoint format version.
pub(crate) const CHECKPOINT_VERSION: u32 = 1;

/// Attempts for a failing checkpoint write before escalating to fatal.
const WRITE_ATTEMPTS: u32 = 3;

/// Backoff between checkpoint write attempts.
const WRITE_BACKOFF: Duration = Duration::from_millis(20);

/// Writer-side checkpoint: where the next append will land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadCheckpoint {
    /// Active page number.
    pub page_number:   u64,
    /// Next sequence number to assign.
    pub next_sequence: u64,
    /// Byte offset of the next write in the active page.
    pub write_offset:  u64,
}

impl HeadCheckpoint {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(&HEAD_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.page_number.to_le_bytes());
        buf.extend_from_slice(&self.next_sequence.to_le_bytes());
        buf.extend_from_slice(&self.write_offset.to_le_bytes());
        append_crc(&mut buf);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let body = verify_envelope(data, &HEAD_MAGIC, 36)?;

        Ok(Self {
            page_number:   u64::from_le_bytes(body[8..16].try_into().unwrap()),
            next_sequence: u64::from_le_bytes(body[16..24].try_into().unwrap()),
            write_offset:  u64::from_le_bytes(body[24..32].try_into().unwrap()),
        })
    }
}

/// Reader/ack-side checkpoint for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageCheckpoint {
    /// Page this checkpoint describes.
    pub page_number:    u64,
    /// Sequence number of the first record in the page.
    pub first_sequence: u64,
    /// Records known to exist in the page at checkpoint time.
    pub event_count:    u64,
    /// True once the page stopped accepting appends.
    pub end_of_page:    bool,
    /// Acknowledged sequence ranges, inclusive, sorted, disjoint.
    pub acked:          Vec<(u64, u64)>,
}

impl PageCheckpoint {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(41 + self.acked.len() * 16 + 4);
        buf.extend_from_slice(&PAGE_CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.page_number.to_le_bytes());
        buf.extend_from_slice(&self.first_sequence.to_le_bytes());
        buf.extend_from_slice(&self.event_count.to_le_bytes());
        buf.push(u8::from(self.end_of_page));
        buf.extend_from_slice(&(self.acked.len() as u32).to_le_bytes());
        for (start, end) in &self.acked {
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&end.to_le_bytes());
        }
        append_crc(&mut buf);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let body = verify_envelope(data, &PAGE_CHECKPOINT_MAGIC, 41)?;

        let page_number = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let first_sequence = u64::from_le_bytes(body[16..24].try_into().unwrap());
        let event_count = u64::from_le_bytes(body[24..32].try_into().unwrap());
        let end_of_page = body[32] != 0;
        let range_count = u32::from_le_bytes(body[33..37].try_into().unwrap()) as usize;

        ensure!(
            body.len() == 37 + range_count * 16,
            CheckpointCorruptedSnafu {
                reason: format!(
                    "range section truncated: {} ranges do not fit {} bytes",
                    range_count,
                    body.len()
                ),
            }
        );

        let mut acked = Vec::with_capacity(range_count);
        let mut pos = 37;
        for _ in 0..range_count {
            let start = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
            let end = u64::from_le_bytes(body[pos + 8..pos + 16].try_into().unwrap());
            ensure!(
                start <= end,
                CheckpointCorruptedSnafu {
                    reason: format!("inverted ack range {start}..{end}"),
                }
            );
            acked.push((start, end));
            pos += 16;
        }

        Ok(Self {
            page_number,
            first_sequence,
            event_count,
            end_of_page,
            acked,
        })
    }
}

fn append_crc(buf: &mut Vec<u8>) {
    let mut hasher = Hasher::new();
    hasher.update(buf);
    let crc = hasher.finalize();
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Validate magic, version, and trailing CRC; returns the body without the
/// CRC suffix.
fn verify_envelope<'a>(data: &'a [u8], magic: &[u8; 4], min_len: usize) -> Result<&'a [u8]> {
    ensure!(
        data.len() >= min_len,
        CheckpointCorruptedSnafu {
            reason: format!("record too short: {} bytes", data.len()),
        }
    );

    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let computed_crc = {
        let mut hasher = Hasher::new();
        hasher.update(body);
        hasher.finalize()
    };
    ensure!(
        stored_crc == computed_crc,
        CheckpointCorruptedSnafu {
            reason: format!("checksum mismatch: stored={stored_crc:#x}, computed={computed_crc:#x}"),
        }
    );

    ensure!(
        &body[0..4] == magic,
        CheckpointCorruptedSnafu {
            reason: format!("invalid magic: {:?}", &body[0..4]),
        }
    );

    let version = u32::from_le_bytes(body[4..8].try_into().unwrap());
    ensure!(version == CHECKPOINT_VERSION, UnsupportedVersionSnafu { version });

    Ok(body)
}

/// Write a checkpoint record atomically: temp file in the same directory,
/// fsync, rename over the target, fsync the directory.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }

    debug!(path = ?path, "Checkpoint written");
    Ok(())
}

/// Write a checkpoint with bounded retries. A persistently failing write is
/// surfaced to the caller as fatal: durability guarantees can no longer be
/// met.
pub(crate) fn write_with_retry(path: &Path, data: &[u8]) -> Result<()> {
    let mut last_err: Option<Error> = None;

    for attempt in 1..=WRITE_ATTEMPTS {
        match write_atomic(path, data) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(path = ?path, attempt, error = %e, "Checkpoint write failed");
                last_err = Some(e);
                if attempt < WRITE_ATTEMPTS {
                    thread::sleep(WRITE_BACKOFF * attempt);
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        CheckpointCorruptedSnafu {
            reason: "checkpoint write failed without an error".to_string(),
        }
        .build()
    }))
}

/// Read and parse a checkpoint file. Returns `None` when the file does not
/// exist; a corrupt file is an error so the caller can decide to fall back
/// to a full page rescan.
pub(crate) fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(Some(data))
}

pub(crate) fn read_head(path: &Path) -> Result<Option<HeadCheckpoint>> {
    match read_file(path)? {
        None => Ok(None),
        Some(data) => Ok(Some(HeadCheckpoint::deserialize(&data)?)),
    }
}

pub(crate) fn read_page(path: &Path) -> Result<Option<PageCheckpoint>> {
    match read_file(path)? {
        None => Ok(None),
        Some(data) => Ok(Some(PageCheckpoint::deserialize(&data)?)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    fn sample_page_checkpoint() -> PageCheckpoint {
        PageCheckpoint {
            page_number:    3,
            first_sequence: 100,
            event_count:    50,
            end_of_page:    true,
            acked:          vec![(100, 119), (130, 149)],
        }
    }

    #[test]
    fn test_head_roundtrip() {
        let head = HeadCheckpoint {
            page_number:   7,
            next_sequence: 12345,
            write_offset:  65536,
        };

        let bytes = head.serialize();
        let recovered = HeadCheckpoint::deserialize(&bytes).unwrap();
        assert_eq!(recovered, head);
    }

    #[test]
    fn test_page_roundtrip() {
        let checkpoint = sample_page_checkpoint();
        let bytes = checkpoint.serialize();
        let recovered = PageCheckpoint::deserialize(&bytes).unwrap();
        assert_eq!(recovered, checkpoint);
    }

    #[test]
    fn test_page_roundtrip_no_acks() {
        let checkpoint = PageCheckpoint {
            page_number:    1,
            first_sequence: 1,
            event_count:    0,
            end_of_page:    false,
            acked:          vec![],
        };
        let bytes = checkpoint.serialize();
        let recovered = PageCheckpoint::deserialize(&bytes).unwrap();
        assert_eq!(recovered, checkpoint);
    }

    fn corrupt_magic(bytes: &mut [u8]) {
        bytes[0] = 0xFF;
    }

    fn corrupt_crc(bytes: &mut [u8]) {
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
    }

    #[test_case(corrupt_magic ; "invalid magic")]
    #[test_case(corrupt_crc ; "invalid checksum")]
    fn test_deserialize_corrupted(corrupt_fn: fn(&mut [u8])) {
        let mut bytes = sample_page_checkpoint().serialize();
        corrupt_fn(&mut bytes);
        assert!(PageCheckpoint::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_deserialize_too_short() {
        assert!(HeadCheckpoint::deserialize(&[0u8; 10]).is_err());
        assert!(PageCheckpoint::deserialize(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_write_and_read_head() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.head");

        assert!(read_head(&path).unwrap().is_none());

        let head = HeadCheckpoint {
            page_number:   1,
            next_sequence: 42,
            write_offset:  4096,
        };
        write_with_retry(&path, &head.serialize()).unwrap();

        let recovered = read_head(&path).unwrap().unwrap();
        assert_eq!(recovered, head);

        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_rewrite_replaces_previous() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.3");

        let mut checkpoint = sample_page_checkpoint();
        write_with_retry(&path, &checkpoint.serialize()).unwrap();

        checkpoint.acked = vec![(100, 149)];
        write_with_retry(&path, &checkpoint.serialize()).unwrap();

        let recovered = read_page(&path).unwrap().unwrap();
        assert_eq!(recovered.acked, vec![(100, 149)]);
    }
}
