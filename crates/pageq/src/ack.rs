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

//! Acknowledgement tracking.
//!
//! Acknowledgements arrive out of order (multiple read clients, batches
//! completing at different times), so per-page progress is kept as a sparse
//! set of acknowledged sequence ranges rather than a single watermark. A page
//! becomes reclaimable once it is full and every sequence it holds is
//! acknowledged, regardless of ack order.

use std::collections::BTreeMap;

use crate::record::record_disk_size;

/// Sorted, disjoint, inclusive sequence ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    pub fn from_ranges(ranges: Vec<(u64, u64)>) -> Self {
        let mut set = Self::default();
        for (start, end) in ranges {
            set.insert(start, end);
        }
        set
    }

    /// Insert an inclusive range, merging with any adjacent or overlapping
    /// existing ranges.
    pub fn insert(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);

        let mut new_start = start;
        let mut new_end = end;

        // Index of the first range that could merge with [start, end].
        let idx = self
            .ranges
            .partition_point(|&(_, e)| e.saturating_add(1) < start);

        let mut remove_until = idx;
        while remove_until < self.ranges.len() {
            let (s, e) = self.ranges[remove_until];
            if s > end.saturating_add(1) {
                break;
            }
            new_start = new_start.min(s);
            new_end = new_end.max(e);
            remove_until += 1;
        }

        self.ranges
            .splice(idx..remove_until, std::iter::once((new_start, new_end)));
    }

    pub fn insert_one(&mut self, seq: u64) {
        self.insert(seq, seq);
    }

    pub fn contains(&self, seq: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, e)| e < seq);
        self.ranges.get(idx).is_some_and(|&(s, _)| s <= seq)
    }

    /// Total number of sequences covered.
    pub fn count(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Remove and return the lowest covered sequence.
    pub fn pop_first(&mut self) -> Option<u64> {
        let (start, end) = *self.ranges.first()?;
        if start == end {
            self.ranges.remove(0);
        } else {
            self.ranges[0].0 = start + 1;
        }
        Some(start)
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Inclusive ranges within `[first, last]` NOT covered by this set.
    pub fn complement(&self, first: u64, last: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut cursor = first;

        for &(s, e) in &self.ranges {
            if e < first {
                continue;
            }
            if s > last {
                break;
            }
            if s > cursor {
                gaps.push((cursor, s - 1));
            }
            cursor = cursor.max(e.saturating_add(1));
            if cursor > last {
                return gaps;
            }
        }

        if cursor <= last {
            gaps.push((cursor, last));
        }
        gaps
    }
}

/// Ack progress for one page.
#[derive(Debug)]
pub(crate) struct PageAckState {
    pub first_seq:   u64,
    /// Records written to the page so far. Grows while the page is active.
    pub event_count: u64,
    /// True once the page stopped accepting appends.
    pub end_of_page: bool,
    pub acked:       RangeSet,
    /// Ack operations since this page was last checkpointed.
    pub dirty_acks:  u64,
}

impl PageAckState {
    pub fn fully_acked(&self) -> bool {
        self.end_of_page && self.event_count > 0 && self.acked.count() == self.event_count
    }
}

/// Tracks unacknowledged state across all live pages.
///
/// Guarded by the queue's ack mutex; methods take `&mut self`.
#[derive(Debug, Default)]
pub(crate) struct AckTracker {
    pages:          BTreeMap<u64, PageAckState>,
    /// On-disk size of every unacknowledged record, by sequence.
    sizes:          BTreeMap<u64, u64>,
    unacked_bytes:  u64,
    unacked_events: u64,
}

impl AckTracker {
    /// Register a freshly created, empty page.
    pub fn add_page(&mut self, page_number: u64, first_seq: u64) {
        self.pages.insert(page_number, PageAckState {
            first_seq,
            event_count: 0,
            end_of_page: false,
            acked: RangeSet::default(),
            dirty_acks: 0,
        });
    }

    /// Seed a page from recovery: scanned record sizes plus the acked ranges
    /// the page checkpoint preserved.
    pub fn add_recovered_page(
        &mut self,
        page_number: u64,
        first_seq: u64,
        record_sizes: &[u64],
        acked: RangeSet,
        end_of_page: bool,
    ) {
        for (i, &size) in record_sizes.iter().enumerate() {
            let seq = first_seq + i as u64;
            if !acked.contains(seq) {
                self.sizes.insert(seq, size);
                self.unacked_bytes += size;
                self.unacked_events += 1;
            }
        }

        self.pages.insert(page_number, PageAckState {
            first_seq,
            event_count: record_sizes.len() as u64,
            end_of_page,
            acked,
            dirty_acks: 0,
        });
    }

    /// Account for one appended record.
    pub fn on_write(&mut self, page_number: u64, seq: u64, payload_len: usize) {
        let size = record_disk_size(payload_len) as u64;
        self.sizes.insert(seq, size);
        self.unacked_bytes += size;
        self.unacked_events += 1;

        if let Some(page) = self.pages.get_mut(&page_number) {
            page.event_count += 1;
        }
    }

    /// Mark a page as no longer accepting appends.
    pub fn on_page_full(&mut self, page_number: u64) {
        if let Some(page) = self.pages.get_mut(&page_number) {
            page.end_of_page = true;
        }
    }

    /// Acknowledge an inclusive sequence range. Sequences already acked or
    /// unknown are ignored, making redelivered-then-acked batches harmless.
    ///
    /// Returns the page numbers that became fully acknowledged.
    pub fn ack_range(&mut self, start: u64, end: u64) -> Vec<u64> {
        let mut reclaimable = Vec::new();

        for (&number, page) in &mut self.pages {
            let last = page.first_seq + page.event_count.saturating_sub(1);
            if page.event_count == 0 || end < page.first_seq || start > last {
                continue;
            }

            let was_full = page.fully_acked();
            let s = start.max(page.first_seq);
            let e = end.min(last);

            for seq in s..=e {
                if let Some(size) = self.sizes.remove(&seq) {
                    self.unacked_bytes -= size;
                    self.unacked_events -= 1;
                    page.dirty_acks += 1;
                }
            }
            page.acked.insert(s, e);

            if !was_full && page.fully_acked() {
                reclaimable.push(number);
            }
        }

        reclaimable
    }

    /// Drop a reclaimed page's state.
    pub fn remove_page(&mut self, page_number: u64) {
        self.pages.remove(&page_number);
    }

    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    pub fn unacked_events(&self) -> u64 {
        self.unacked_events
    }

    /// Lowest unacknowledged sequence, if any record is unacknowledged.
    pub fn lowest_unacked(&self) -> Option<u64> {
        self.sizes.keys().next().copied()
    }

    /// All unacknowledged sequences as inclusive ranges, ascending. Used to
    /// seed redelivery after recovery.
    pub fn unacked_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for &seq in self.sizes.keys() {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == seq => *end = seq,
                _ => ranges.push((seq, seq)),
            }
        }
        ranges
    }

    pub fn page_state(&self, page_number: u64) -> Option<&PageAckState> {
        self.pages.get(&page_number)
    }

    /// Pages with unsynced ack progress, paired with their dirty-ack counts.
    pub fn dirty_pages(&self) -> Vec<(u64, u64)> {
        self.pages
            .iter()
            .filter(|(_, p)| p.dirty_acks > 0)
            .map(|(&n, p)| (n, p.dirty_acks))
            .collect()
    }

    pub fn mark_checkpointed(&mut self, page_number: u64) {
        if let Some(page) = self.pages.get_mut(&page_number) {
            page.dirty_acks = 0;
        }
    }
}
