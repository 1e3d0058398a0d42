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

use std::sync::Arc;

use crate::{Result, queue::Inner};

/// Handle for writing items into the queue.
///
/// Cheap to clone; clones share the same queue and interleave safely.
#[derive(Clone)]
pub struct WriteClient {
    inner: Arc<Inner>,
}

impl WriteClient {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Append one item and return its sequence number.
    ///
    /// Blocks while the queue is at capacity until acknowledgements free
    /// space or the queue closes.
    pub fn write(&self, payload: &[u8]) -> Result<u64> {
        self.inner.append(payload, true)
    }

    /// Like [`write`](Self::write), but fails with
    /// [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) instead of
    /// blocking when the queue is at capacity.
    pub fn try_write(&self, payload: &[u8]) -> Result<u64> {
        self.inner.append(payload, false)
    }
}
