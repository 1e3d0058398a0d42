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

//! Item types and on-disk record format definitions.
//!
//! ## On-Disk Record Format
//!
//! Items are stored contiguously in page files with the following binary
//! layout:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────┐
//! │  Length (4B)    │   CRC32 (4B)    │  Payload (variable)  │
//! │  little-endian  │   little-endian │  raw bytes           │
//! └─────────────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! - **Length**: 4-byte little-endian u32 containing the payload size
//! - **CRC32**: 4-byte little-endian checksum over length and payload
//! - **Payload**: Variable-length raw bytes (the actual item data)
//!
//! Pages are pre-allocated and zero-filled, so a zero length prefix marks the
//! end of readable data. This format enables sequential scanning (the length
//! prefix allows skipping to the next record) and corruption detection for
//! torn tail writes after a crash.

use bytes::Bytes;

/// An item read from the queue.
///
/// This is the type handed to consumers inside a [`Batch`](crate::Batch).
/// The sequence number identifies the item for acknowledgement bookkeeping.
#[derive(Debug, Clone)]
pub struct Item {
    /// Monotonically increasing sequence number assigned at write time.
    /// Sequences start at 1, are unique within a queue, and never reused.
    pub sequence: u64,

    /// The item payload.
    pub payload: Bytes,
}

/// Size of the length prefix in bytes (4 bytes = u32).
pub(crate) const RECORD_LENGTH_SIZE: usize = 4;

/// Size of the CRC32 checksum in bytes.
pub(crate) const RECORD_CRC_SIZE: usize = 4;

/// Combined size of the per-record length prefix and checksum.
pub(crate) const RECORD_HEADER_SIZE: usize = RECORD_LENGTH_SIZE + RECORD_CRC_SIZE;

/// Calculate the total on-disk size of a record given its payload length.
#[inline]
pub(crate) const fn record_disk_size(payload_len: usize) -> usize {
    RECORD_HEADER_SIZE + payload_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_disk_size() {
        assert_eq!(record_disk_size(0), 8);
        assert_eq!(record_disk_size(10), 18);
        assert_eq!(record_disk_size(100), 108);
    }

    #[test]
    fn test_item_clone() {
        let item = Item {
            sequence: 42,
            payload:  Bytes::from("test data"),
        };

        let cloned = item.clone();
        assert_eq!(cloned.sequence, 42);
        assert_eq!(cloned.payload, Bytes::from("test data"));
    }
}
