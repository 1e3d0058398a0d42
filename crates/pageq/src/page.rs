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

//! Memory-mapped page files.
//!
//! A page is a pre-allocated, append-only segment file holding a contiguous
//! run of queue records after a fixed 32-byte header:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────┬───────────────┬────────────────┐
//! │ magic (4B)   │ version (4B) │ page no. (8B)  │ first seq (8B)│ created ms (8B)│
//! └──────────────┴──────────────┴────────────────┴───────────────┴────────────────┘
//! ```
//!
//! The file is zero-filled at creation, so a zero record length prefix marks
//! the end of written data. Sequence numbers are not stored per record: the
//! record at index `i` carries sequence `first_seq + i`.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use chrono::Utc;
use mmap_io::MemoryMappedFile;
use snafu::ensure;
use tracing::warn;

use crate::{
    Result,
    crc::{calculate_record_crc, verify_record_crc},
    error::{CorruptPageSnafu, MmapSnafu, UnsupportedVersionSnafu},
    record::{RECORD_CRC_SIZE, RECORD_LENGTH_SIZE, record_disk_size},
};

/// Magic bytes identifying a page file: "QPAG"
pub(crate) const PAGE_MAGIC: [u8; 4] = *b"QPAG";

/// Current page format version.
pub(crate) const PAGE_VERSION: u32 = 1;

/// Size of the page file header in bytes.
pub(crate) const PAGE_HEADER_SIZE: u64 = 32;

/// Fixed header at the start of every page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageHeader {
    /// Monotonically increasing page number (also encoded in the file name).
    pub number:     u64,
    /// Sequence number of the first record in this page.
    pub first_seq:  u64,
    /// Creation time, Unix millis.
    pub created_at: i64,
}

impl PageHeader {
    pub fn new(number: u64, first_seq: u64) -> Self {
        Self {
            number,
            first_seq,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    fn encode(&self) -> [u8; PAGE_HEADER_SIZE as usize] {
        let mut buf = [0u8; PAGE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&PAGE_MAGIC);
        buf[4..8].copy_from_slice(&PAGE_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.number.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_seq.to_le_bytes());
        buf[24..32].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; PAGE_HEADER_SIZE as usize], page: u64) -> Result<Self> {
        ensure!(buf[0..4] == PAGE_MAGIC, CorruptPageSnafu { page, offset: 0u64 });

        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        ensure!(version == PAGE_VERSION, UnsupportedVersionSnafu { version });

        Ok(Self {
            number:     u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            first_seq:  u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            created_at: i64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }
}

/// Result of scanning a page's records during recovery.
#[derive(Debug, Default)]
pub(crate) struct PageScan {
    /// Number of intact records found.
    pub events:       u64,
    /// Byte offset just past the last intact record.
    pub data_end:     u64,
    /// On-disk size of each intact record, in order.
    pub record_sizes: Vec<u64>,
}

/// A writable, memory-mapped page file. Only the active page is held as one.
pub(crate) struct PageFile {
    mmap:     MemoryMappedFile,
    path:     PathBuf,
    capacity: u64,
}

impl PageFile {
    /// Create a new page file pre-allocated to `capacity` bytes and write its
    /// header. The header is flushed immediately so a crash right after
    /// rollover still leaves an identifiable page on disk.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u64, header: &PageHeader) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mmap = MemoryMappedFile::create_rw(&path, capacity)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())?;

        let page = Self { mmap, path, capacity };
        page.write_at(0, &header.encode())?;
        page.flush_range(0, PAGE_HEADER_SIZE)?;

        Ok(page)
    }

    /// Reopen an existing page file for appending (recovery of the active
    /// page).
    pub fn open<P: AsRef<Path>>(path: P, page_number: u64) -> Result<(Self, PageHeader)> {
        let path = path.as_ref().to_path_buf();

        let mmap = MemoryMappedFile::open_rw(&path)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())?;
        let capacity = mmap.len();

        let page = Self { mmap, path, capacity };
        let mut buf = [0u8; PAGE_HEADER_SIZE as usize];
        page.read_at(0, &mut buf)?;
        let header = PageHeader::decode(&buf, page_number)?;

        Ok((page, header))
    }

    /// Append one record at `offset`. The caller guarantees the record fits
    /// within the page capacity.
    pub fn append_record(&self, offset: u64, payload: &[u8]) -> Result<u64> {
        let length = payload.len() as u32;
        let crc = calculate_record_crc(length, payload);

        let mut pos = offset;
        self.write_at(pos, &length.to_le_bytes())?;
        pos += RECORD_LENGTH_SIZE as u64;
        self.write_at(pos, &crc.to_le_bytes())?;
        pos += RECORD_CRC_SIZE as u64;
        self.write_at(pos, payload)?;

        Ok(offset + record_disk_size(payload.len()) as u64)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.mmap
            .update_region(offset, data)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())
    }

    #[inline]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.mmap
            .read_into(offset, buf)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())
    }

    /// Flush the whole page to disk.
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())
    }

    /// Flush a byte range to disk. Used before checkpoint writes so the
    /// checkpoint never claims durability for unflushed data.
    pub fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        self.mmap
            .flush_range(offset, len)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())
    }
}

/// A read-only view of a page file, used by readers and recovery.
pub(crate) struct PageView {
    mmap:   MemoryMappedFile,
    size:   u64,
    number: u64,
}

impl PageView {
    pub fn open<P: AsRef<Path>>(path: P, page_number: u64) -> Result<(Self, PageHeader)> {
        let mmap = MemoryMappedFile::open_ro(path.as_ref())
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())?;
        let size = mmap.len();

        let view = Self {
            mmap,
            size,
            number: page_number,
        };
        let mut buf = [0u8; PAGE_HEADER_SIZE as usize];
        view.read_at(0, &mut buf)?;
        let header = PageHeader::decode(&buf, page_number)?;

        Ok((view, header))
    }

    #[inline]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.mmap
            .read_into(offset, buf)
            .map_err(|e| MmapSnafu { message: e.to_string() }.build())
    }

    /// Total on-disk size of the record starting at `offset`, without reading
    /// the payload. Used to skip forward when seeking.
    pub fn record_size_at(&self, offset: u64) -> Result<u64> {
        let length = self.record_length_at(offset)?;
        ensure!(
            length > 0 && offset + record_disk_size(length as usize) as u64 <= self.size,
            CorruptPageSnafu { page: self.number, offset }
        );
        Ok(record_disk_size(length as usize) as u64)
    }

    /// Read and verify the record starting at `offset`.
    ///
    /// Returns the payload and the offset just past the record. A zero
    /// length, truncated record, or checksum mismatch yields
    /// [`Error::CorruptPage`](crate::Error::CorruptPage); callers on the read
    /// path treat that as end-of-readable-data.
    pub fn read_record_at(&self, offset: u64) -> Result<(Bytes, u64)> {
        let length = self.record_length_at(offset)?;
        ensure!(
            length > 0 && offset + record_disk_size(length as usize) as u64 <= self.size,
            CorruptPageSnafu { page: self.number, offset }
        );

        let mut crc_buf = [0u8; RECORD_CRC_SIZE];
        self.read_at(offset + RECORD_LENGTH_SIZE as u64, &mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut payload = vec![0u8; length as usize];
        self.read_at(offset + (RECORD_LENGTH_SIZE + RECORD_CRC_SIZE) as u64, &mut payload)?;

        ensure!(
            verify_record_crc(length, &payload, stored_crc),
            CorruptPageSnafu { page: self.number, offset }
        );

        let next = offset + record_disk_size(length as usize) as u64;
        Ok((Bytes::from(payload), next))
    }

    /// Scan all records from the start of the page, stopping at the first
    /// zero length, truncated record, or checksum mismatch (a torn tail
    /// write from an unclean shutdown).
    pub fn scan(&self) -> Result<PageScan> {
        let mut scan = PageScan {
            events:       0,
            data_end:     PAGE_HEADER_SIZE,
            record_sizes: Vec::new(),
        };

        loop {
            if scan.data_end + RECORD_LENGTH_SIZE as u64 > self.size {
                break;
            }

            let length = self.record_length_at(scan.data_end)?;
            if length == 0 {
                break;
            }

            let total = record_disk_size(length as usize) as u64;
            if scan.data_end + total > self.size {
                warn!(
                    page = self.number,
                    offset = scan.data_end,
                    length,
                    "Truncated record at end of page"
                );
                break;
            }

            match self.read_record_at(scan.data_end) {
                Ok((_, next)) => {
                    scan.record_sizes.push(total);
                    scan.events += 1;
                    scan.data_end = next;
                }
                Err(_) => {
                    warn!(
                        page = self.number,
                        offset = scan.data_end,
                        "Checksum mismatch at end of page, treating as torn write"
                    );
                    break;
                }
            }
        }

        Ok(scan)
    }

    fn record_length_at(&self, offset: u64) -> Result<u32> {
        ensure!(
            offset + RECORD_LENGTH_SIZE as u64 <= self.size,
            CorruptPageSnafu { page: self.number, offset }
        );
        let mut length_buf = [0u8; RECORD_LENGTH_SIZE];
        self.read_at(offset, &mut length_buf)?;
        Ok(u32::from_le_bytes(length_buf))
    }
}

/// Shared, mostly-immutable metadata for one live page.
///
/// The writer advances `events`/`data_end` as it appends to the active page;
/// readers observe them without taking the write lock.
#[derive(Debug)]
pub(crate) struct PageEntry {
    pub number:    u64,
    pub first_seq: u64,
    pub path:      PathBuf,
    /// Records currently readable in this page.
    pub events:    AtomicU64,
    /// Byte offset just past the last readable record.
    pub data_end:  AtomicU64,
    /// True once the page stopped accepting appends.
    pub full:      AtomicBool,
}

impl PageEntry {
    pub fn new(number: u64, first_seq: u64, path: PathBuf) -> Self {
        Self {
            number,
            first_seq,
            path,
            events: AtomicU64::new(0),
            data_end: AtomicU64::new(PAGE_HEADER_SIZE),
            full: AtomicBool::new(false),
        }
    }

    pub fn contains(&self, seq: u64) -> bool {
        let events = self.events.load(Ordering::Acquire);
        events > 0 && seq >= self.first_seq && seq < self.first_seq + events
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::Error;

    fn test_page(dir: &TempDir, capacity: u64) -> PageFile {
        let header = PageHeader::new(1, 1);
        PageFile::create(dir.path().join("page.1"), capacity, &header).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let header = PageHeader::new(7, 42);
        let path = temp_dir.path().join("page.7");

        {
            PageFile::create(&path, 4096, &header).unwrap();
        }

        let (_, recovered) = PageView::open(&path, 7).unwrap();
        assert_eq!(recovered, header);

        let (_, reopened) = PageFile::open(&path, 7).unwrap();
        assert_eq!(reopened, header);
    }

    #[test]
    fn test_append_and_read_records() {
        let temp_dir = TempDir::new().unwrap();
        let page = test_page(&temp_dir, 4096);

        let mut offset = PAGE_HEADER_SIZE;
        offset = page.append_record(offset, b"first").unwrap();
        let second_start = offset;
        offset = page.append_record(offset, b"second").unwrap();
        page.flush().unwrap();

        let (view, _) = PageView::open(page.path(), 1).unwrap();

        let (payload, next) = view.read_record_at(PAGE_HEADER_SIZE).unwrap();
        assert_eq!(payload.as_ref(), b"first");
        assert_eq!(next, second_start);

        let (payload, next) = view.read_record_at(second_start).unwrap();
        assert_eq!(payload.as_ref(), b"second");
        assert_eq!(next, offset);
    }

    #[test]
    fn test_scan_stops_at_zero_length() {
        let temp_dir = TempDir::new().unwrap();
        let page = test_page(&temp_dir, 4096);

        let mut offset = PAGE_HEADER_SIZE;
        for payload in [&b"one"[..], b"two", b"three"] {
            offset = page.append_record(offset, payload).unwrap();
        }
        page.flush().unwrap();

        let (view, _) = PageView::open(page.path(), 1).unwrap();
        let scan = view.scan().unwrap();

        assert_eq!(scan.events, 3);
        assert_eq!(scan.data_end, offset);
        assert_eq!(scan.record_sizes.len(), 3);
    }

    #[test]
    fn test_scan_stops_at_corrupt_record() {
        let temp_dir = TempDir::new().unwrap();
        let page = test_page(&temp_dir, 4096);

        let mut offset = PAGE_HEADER_SIZE;
        offset = page.append_record(offset, b"good").unwrap();
        let good_end = offset;

        // Simulate a torn write: length and payload present, garbage CRC.
        let payload = b"torn";
        page.write_at(offset, &(payload.len() as u32).to_le_bytes())
            .unwrap();
        page.write_at(offset + 4, &0xDEAD_BEEFu32.to_le_bytes())
            .unwrap();
        page.write_at(offset + 8, payload).unwrap();
        page.flush().unwrap();

        let (view, _) = PageView::open(page.path(), 1).unwrap();
        let scan = view.scan().unwrap();

        assert_eq!(scan.events, 1);
        assert_eq!(scan.data_end, good_end);
    }

    #[test]
    fn test_read_past_data_is_corrupt_page() {
        let temp_dir = TempDir::new().unwrap();
        let page = test_page(&temp_dir, 256);
        page.flush().unwrap();

        let (view, _) = PageView::open(page.path(), 1).unwrap();
        let result = view.read_record_at(PAGE_HEADER_SIZE);

        assert!(matches!(result, Err(Error::CorruptPage { .. })));
    }

    #[test]
    fn test_page_entry_bounds() {
        let entry = PageEntry::new(1, 10, PathBuf::from("page.1"));
        assert!(!entry.contains(10));

        entry.events.store(5, Ordering::Release);
        assert!(entry.contains(10));
        assert!(entry.contains(14));
        assert!(!entry.contains(15));
    }
}
