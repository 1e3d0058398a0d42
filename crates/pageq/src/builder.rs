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

use std::{path::PathBuf, time::Duration};

use crate::{Queue, QueueConfig, Result};

/// Fluent constructor for a [`Queue`].
pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            config: QueueConfig {
                dir: dir.into(),
                ..Default::default()
            },
        }
    }

    pub fn page_capacity(mut self, bytes: u64) -> Self {
        self.config.page_capacity = bytes;
        self
    }

    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.config.max_bytes = bytes;
        self
    }

    pub fn max_events(mut self, events: u64) -> Self {
        self.config.max_events = events;
        self
    }

    pub fn checkpoint_writes(mut self, writes: u64) -> Self {
        self.config.checkpoint_writes = writes;
        self
    }

    pub fn checkpoint_acks(mut self, acks: u64) -> Self {
        self.config.checkpoint_acks = acks;
        self
    }

    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    /// Open the queue: acquires the directory lock, runs recovery, and spawns
    /// the background page reclaimer.
    pub fn build(self) -> Result<Queue> {
        Queue::open(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config.dir, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.page_capacity, 64 * 1024 * 1024);
        assert_eq!(builder.config.max_events, 0);
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .page_capacity(4096)
            .max_bytes(1024 * 1024)
            .max_events(500)
            .checkpoint_writes(16)
            .checkpoint_acks(16)
            .checkpoint_interval(Duration::from_millis(250));

        assert_eq!(builder.config.page_capacity, 4096);
        assert_eq!(builder.config.max_bytes, 1024 * 1024);
        assert_eq!(builder.config.max_events, 500);
        assert_eq!(builder.config.checkpoint_writes, 16);
        assert_eq!(builder.config.checkpoint_acks, 16);
        assert_eq!(builder.config.checkpoint_interval, Duration::from_millis(250));
    }
}
