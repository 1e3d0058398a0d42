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

use std::{sync::Arc, time::Duration};

use crate::{Result, queue::Inner, record::Item};

/// Handle for consuming items in batches.
///
/// Clones share the queue's single tail cursor: each item is delivered to
/// exactly one batch at a time, and concurrent readers split the stream
/// between them.
#[derive(Clone)]
pub struct ReadClient {
    inner: Arc<Inner>,
}

impl ReadClient {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Take up to `max_items` items, waiting up to `max_wait` for the first
    /// one. Returns an empty batch on timeout.
    ///
    /// Previously delivered but unacknowledged items (from dropped batches or
    /// recovery) are redelivered before new ones.
    pub fn read_batch(&self, max_items: usize, max_wait: Duration) -> Result<Batch> {
        let items = self.inner.read_batch(max_items, max_wait)?;
        let runs = sequence_runs(&items);
        Ok(Batch {
            inner: Arc::clone(&self.inner),
            items,
            runs,
            acked: false,
        })
    }
}

/// One delivery of items.
///
/// The items stay unacknowledged, and therefore owned by this batch, until
/// [`ack`](Batch::ack) is called. A batch dropped without acking returns its
/// items to the queue for redelivery, so a crashed or bailing consumer never
/// loses data.
pub struct Batch {
    inner: Arc<Inner>,
    items: Vec<Item>,
    /// Inclusive sequence runs covering `items`.
    runs:  Vec<(u64, u64)>,
    acked: bool,
}

impl Batch {
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Acknowledge every item in the batch, releasing its queue space and
    /// making fully acknowledged pages reclaimable.
    pub fn ack(mut self) -> Result<()> {
        self.acked = true;
        self.inner.ack_runs(&self.runs)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.acked && !self.runs.is_empty() {
            self.inner.requeue_runs(&self.runs);
        }
    }
}

/// Collapse item sequences into inclusive runs. Items arrive in ascending
/// order but may be non-contiguous when redeliveries mix with fresh reads.
fn sequence_runs(items: &[Item]) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for item in items {
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == item.sequence => *end = item.sequence,
            _ => runs.push((item.sequence, item.sequence)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn item(sequence: u64) -> Item {
        Item {
            sequence,
            payload: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn test_sequence_runs() {
        assert!(sequence_runs(&[]).is_empty());
        assert_eq!(sequence_runs(&[item(5)]), vec![(5, 5)]);
        assert_eq!(
            sequence_runs(&[item(1), item(2), item(3), item(7), item(8), item(10)]),
            vec![(1, 3), (7, 8), (10, 10)]
        );
    }
}
