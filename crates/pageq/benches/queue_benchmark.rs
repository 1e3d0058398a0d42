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

//! Benchmarks for the persisted queue.
//!
//! Measures:
//! - Single item write latency
//! - Write throughput at different item sizes
//! - Read + ack round-trip throughput

use std::{hint::black_box, time::Duration};

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pageq::{Queue, QueueBuilder};
use tempfile::TempDir;

/// Item sizes to benchmark (bytes)
const ITEM_SIZES: &[usize] = &[64, 256, 1024, 4096, 16384];

/// Number of items for throughput tests
const BATCH_COUNT: usize = 10_000;

const READ_WAIT: Duration = Duration::from_millis(100);

/// Create a queue in a temporary directory with checkpointing relaxed so the
/// benchmark measures the write path rather than fsync cadence.
fn create_queue(temp_dir: &TempDir) -> Queue {
    QueueBuilder::new(temp_dir.path())
        .page_capacity(256 * 1024 * 1024)
        .checkpoint_writes(4096)
        .checkpoint_acks(4096)
        .checkpoint_interval(Duration::from_secs(5))
        .build()
        .expect("Failed to create queue")
}

fn generate_item(size: usize) -> Vec<u8> {
    vec![0xABu8; size]
}

/// Benchmark single item write latency
fn bench_write_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_latency");

    for &size in ITEM_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let queue = create_queue(&temp_dir);
            let writer = queue.write_client();
            let item = generate_item(size);

            b.iter(|| {
                writer.write(black_box(&item)).unwrap();
            });

            queue.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark write throughput - items per second
fn bench_write_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_throughput");
    group.sample_size(20);

    for &size in ITEM_SIZES {
        let total_bytes = (size * BATCH_COUNT) as u64;
        group.throughput(Throughput::Bytes(total_bytes));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let queue = create_queue(&temp_dir);
                    let writer = queue.write_client();
                    let item = generate_item(size);
                    (temp_dir, queue, writer, item)
                },
                |(temp_dir, queue, writer, item)| {
                    for _ in 0..BATCH_COUNT {
                        writer.write(black_box(&item)).unwrap();
                    }
                    queue.close().unwrap();
                    drop(temp_dir);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark the full write -> read -> ack round trip
fn bench_read_ack_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_ack_throughput");
    group.sample_size(20);

    let batch_sizes = [100, 1000, 5000];
    let item_size = 256;

    for &count in &batch_sizes {
        let total_bytes = (item_size * count) as u64;
        group.throughput(Throughput::Bytes(total_bytes));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let queue = create_queue(&temp_dir);
                    let writer = queue.write_client();
                    let item = generate_item(item_size);
                    for _ in 0..count {
                        writer.write(&item).unwrap();
                    }
                    (temp_dir, queue)
                },
                |(temp_dir, queue)| {
                    let reader = queue.read_client();
                    let mut remaining = count;
                    while remaining > 0 {
                        let batch = reader.read_batch(remaining, READ_WAIT).unwrap();
                        remaining -= batch.len();
                        batch.ack().unwrap();
                    }
                    queue.close().unwrap();
                    drop(temp_dir);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_latency,
    bench_write_throughput,
    bench_read_ack_throughput
);
criterion_main!(benches);
