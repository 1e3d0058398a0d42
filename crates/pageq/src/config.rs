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

use std::path::PathBuf;
use std::time::Duration;

use crate::record::RECORD_HEADER_SIZE;

/// Configuration for a persisted queue.
///
/// Capacity limits of zero mean "unbounded". Checkpoint thresholds are
/// independent: a checkpoint is written when any one of them is crossed.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding page files, checkpoints, and the lock file.
    pub dir: PathBuf,
    /// Size in bytes at which the active page rolls over to a new one.
    pub page_capacity: u64,
    /// Maximum unacknowledged bytes resident before writers block. 0 = none.
    pub max_bytes: u64,
    /// Maximum unacknowledged items resident before writers block. 0 = none.
    pub max_events: u64,
    /// Write a head checkpoint after this many writes.
    pub checkpoint_writes: u64,
    /// Write page checkpoints after this many acknowledgements.
    pub checkpoint_acks: u64,
    /// Write checkpoints at least this often while operations occur.
    pub checkpoint_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./queue_data"),
            page_capacity: 64 * 1024 * 1024,
            max_bytes: 1024 * 1024 * 1024,
            max_events: 0,
            checkpoint_writes: 1024,
            checkpoint_acks: 1024,
            checkpoint_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// True when admitting `additional_bytes` for one more item stays within
    /// the configured capacity, given the current unacked totals.
    ///
    /// Payloads are bounded by [`QueueConfig::max_payload`] before admission,
    /// so every admitted item fits once the queue drains and the byte limit
    /// holds strictly.
    pub(crate) fn admits(
        &self,
        unacked_bytes: u64,
        unacked_events: u64,
        additional_bytes: u64,
    ) -> bool {
        let bytes_ok = self.max_bytes == 0 || unacked_bytes + additional_bytes <= self.max_bytes;
        let events_ok = self.max_events == 0 || unacked_events < self.max_events;
        bytes_ok && events_ok
    }

    /// Largest payload a write may carry. The u32 length prefix caps the
    /// record format; a bounded queue additionally caps payloads at what
    /// `max_bytes` can ever hold, so no item can block the writer forever.
    pub(crate) fn max_payload(&self) -> u64 {
        let format_limit = u64::from(u32::MAX);
        if self.max_bytes == 0 {
            format_limit
        } else {
            format_limit.min(self.max_bytes.saturating_sub(RECORD_HEADER_SIZE as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.page_capacity, 64 * 1024 * 1024);
        assert_eq!(config.max_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.max_events, 0);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(1));
    }

    #[test_case(0, 0, 100, true ; "empty queue within limits")]
    #[test_case(900, 1, 100, true ; "exactly at byte limit")]
    #[test_case(901, 1, 100, false ; "over byte limit")]
    #[test_case(0, 2, 10, false ; "at event limit")]
    #[test_case(0, 0, 1001, false ; "single item over byte limit")]
    fn test_admits(unacked_bytes: u64, unacked_events: u64, add: u64, expected: bool) {
        let config = QueueConfig {
            max_bytes: 1000,
            max_events: 2,
            ..Default::default()
        };
        assert_eq!(config.admits(unacked_bytes, unacked_events, add), expected);
    }

    #[test]
    fn test_unbounded_when_zero() {
        let config = QueueConfig {
            max_bytes: 0,
            max_events: 0,
            ..Default::default()
        };
        assert!(config.admits(u64::MAX / 2, 1_000_000, 1024));
    }

    #[test]
    fn test_max_payload_tracks_byte_limit() {
        let config = QueueConfig {
            max_bytes: 100,
            ..Default::default()
        };
        assert_eq!(config.max_payload(), 100 - RECORD_HEADER_SIZE as u64);

        let unbounded = QueueConfig {
            max_bytes: 0,
            ..Default::default()
        };
        assert_eq!(unbounded.max_payload(), u64::from(u32::MAX));
    }
}
