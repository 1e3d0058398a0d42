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

//! A durable, acknowledgement-tracking persisted queue.
//!
//! Items are appended to pre-allocated, memory-mapped page files, delivered
//! in batches, and retained on disk until explicitly acknowledged. Delivery
//! is at-least-once: a batch dropped without acknowledgement, or a process
//! crash, results in redelivery rather than loss. Crash consistency comes
//! from per-record checksums plus atomically replaced checkpoint files;
//! recovery rescans page data and trusts it over any checkpoint.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use pageq::QueueBuilder;
//!
//! # fn main() -> pageq::Result<()> {
//! let queue = QueueBuilder::new("/tmp/my_queue")
//!     .page_capacity(16 * 1024 * 1024)
//!     .max_bytes(256 * 1024 * 1024)
//!     .build()?;
//!
//! let writer = queue.write_client();
//! writer.write(b"hello")?;
//!
//! let reader = queue.read_client();
//! let batch = reader.read_batch(128, Duration::from_millis(50))?;
//! for item in batch.items() {
//!     println!("{}: {} bytes", item.sequence, item.payload.len());
//! }
//! batch.ack()?;
//! # Ok(())
//! # }
//! ```

mod ack;
mod builder;
mod checkpoint;
mod config;
mod crc;
mod error;
mod lock;
mod page;
mod queue;
mod reader;
mod reclaim;
mod record;
mod store;
mod writer;

pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use queue::{Queue, open};
pub use reader::{Batch, ReadClient};
pub use record::Item;
pub use writer::WriteClient;
