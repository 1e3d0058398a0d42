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

//! The queue coordinator.
//!
//! All clients share one [`Inner`]: writers append under the write mutex,
//! readers advance a shared tail cursor under the tail mutex, and the ack
//! tracker lives under its own mutex paired with the backpressure condvar.
//!
//! Lock ordering: the `write` mutex is outermost and may be held while taking
//! any other lock (`acks`, `tail`, `pages`, `checkpoint_io`); the `tail`
//! mutex may additionally be held while reading `pages`. No other pair is
//! ever held together. Checkpoint file writes happen after the hot mutexes
//! are released, serialized by `checkpoint_io`.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use snafu::ensure;
use tracing::{debug, info, warn};

use crate::{
    Result,
    ack::{AckTracker, PageAckState, RangeSet},
    checkpoint::{self, HeadCheckpoint, PageCheckpoint},
    config::QueueConfig,
    error::{CapacityExceededSnafu, ClosedSnafu, EmptyItemSnafu, Error, ItemTooLargeSnafu},
    lock::DirLock,
    page::{PAGE_HEADER_SIZE, PageEntry, PageFile, PageHeader, PageScan, PageView},
    reader::ReadClient,
    reclaim::Reclaimer,
    record::{Item, record_disk_size},
    store::PageStore,
    writer::WriteClient,
};

/// How long blocked writers sleep between capacity re-checks, so a close is
/// observed promptly even without a wakeup.
const WRITE_POLL: Duration = Duration::from_millis(200);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WriteState {
    page:        Arc<PageFile>,
    entry:       Arc<PageEntry>,
    next_seq:    u64,
    offset:      u64,
    /// Writes since the last head checkpoint.
    dirty:       u64,
    /// Set after a rollover so the next append persists the head regardless
    /// of cadence.
    force_sync:  bool,
    last_synced: Instant,
}

struct AckState {
    tracker:         AckTracker,
    /// Capacity reserved by writers between admission and append.
    reserved_bytes:  u64,
    reserved_events: u64,
    /// Acks since the last page checkpoint sweep.
    dirty:           u64,
    last_synced:     Instant,
}

/// Cached read position inside one page, so sequential reads skip the
/// walk-from-header offset resolution.
struct TailCursor {
    page_number: u64,
    view:        PageView,
    next_seq:    u64,
    next_offset: u64,
}

struct TailState {
    /// Next never-delivered sequence.
    cursor:  u64,
    /// Delivered-but-unacked sequences returned for redelivery. Served
    /// before the cursor so redeliveries come first.
    requeue: RangeSet,
    cache:   Option<TailCursor>,
}

/// Guards checkpoint file writes, which run outside the hot mutexes. Tracks
/// the highest head sequence persisted so a snapshot that lost the race to
/// the file is skipped instead of regressing the head.
#[derive(Default)]
struct CheckpointIo {
    last_head_seq: u64,
}

pub(crate) struct Inner {
    config:    QueueConfig,
    store:     PageStore,
    _dir_lock: DirLock,
    closed:    AtomicBool,

    write: Mutex<WriteState>,
    acks:  Mutex<AckState>,
    tail:  Mutex<TailState>,
    pages: RwLock<Vec<Arc<PageEntry>>>,

    /// Signalled when acks free capacity or the queue closes.
    space:    Condvar,
    /// Signalled when records become readable or the queue closes.
    readable: Condvar,

    checkpoint_io: Mutex<CheckpointIo>,
    reclaimer:     Mutex<Option<Reclaimer>>,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pages_read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<PageEntry>>> {
        self.pages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn pages_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<PageEntry>>> {
        self.pages.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- write path ----

    pub fn append(&self, payload: &[u8], block: bool) -> Result<u64> {
        ensure!(!self.is_closed(), ClosedSnafu);
        ensure!(!payload.is_empty(), EmptyItemSnafu);

        let limit = self.config.max_payload();
        ensure!(
            payload.len() as u64 <= limit,
            ItemTooLargeSnafu {
                size: payload.len(),
                limit,
            }
        );

        let size = record_disk_size(payload.len()) as u64;
        self.reserve(size, block)?;
        self.append_reserved(payload, size)
    }

    /// Admission control: wait (or fail) until the item fits within the
    /// configured capacity, then reserve its footprint so concurrent writers
    /// cannot all be admitted against the same headroom.
    fn reserve(&self, size: u64, block: bool) -> Result<()> {
        let mut acks = lock(&self.acks);
        loop {
            ensure!(!self.is_closed(), ClosedSnafu);

            let bytes = acks.tracker.unacked_bytes() + acks.reserved_bytes;
            let events = acks.tracker.unacked_events() + acks.reserved_events;
            if self.config.admits(bytes, events, size) {
                acks.reserved_bytes += size;
                acks.reserved_events += 1;
                return Ok(());
            }

            ensure!(block, CapacityExceededSnafu);
            acks = self
                .space
                .wait_timeout(acks, WRITE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn append_reserved(&self, payload: &[u8], size: u64) -> Result<u64> {
        let mut write = lock(&self.write);

        // Until the reservation is converted below, any failure must hand the
        // reserved capacity back.
        let appended = self
            .roll_if_needed(&mut write, size)
            .and_then(|()| write.page.append_record(write.offset, payload));
        let next = match appended {
            Ok(next) => next,
            Err(e) => {
                self.release_reservation(size);
                return Err(e);
            }
        };

        let seq = write.next_seq;
        write.offset = next;
        write.next_seq += 1;
        write.entry.data_end.store(next, Ordering::Release);
        write.entry.events.fetch_add(1, Ordering::Release);

        {
            let mut acks = lock(&self.acks);
            acks.reserved_bytes -= size;
            acks.reserved_events -= 1;
            acks.tracker.on_write(write.entry.number, seq, payload.len());
        }

        write.dirty += 1;
        let due = write.force_sync
            || write.dirty >= self.config.checkpoint_writes
            || write.last_synced.elapsed() >= self.config.checkpoint_interval;
        let head = due.then(|| head_snapshot(&mut write));
        drop(write);

        self.notify_readable();

        if let Some((page, head)) = head {
            self.write_head_checkpoint(&page, &head)?;
        }

        Ok(seq)
    }

    fn roll_if_needed(&self, write: &mut WriteState, size: u64) -> Result<()> {
        if write.offset + size > write.page.capacity() {
            self.roll_page(write, size)?;
        }
        Ok(())
    }

    fn release_reservation(&self, size: u64) {
        let mut acks = lock(&self.acks);
        acks.reserved_bytes -= size;
        acks.reserved_events -= 1;
    }

    /// Wake readers after publishing new records. Taking and releasing the
    /// tail mutex first closes the race against a reader that has checked for
    /// data but not yet started waiting.
    fn notify_readable(&self) {
        drop(lock(&self.tail));
        self.readable.notify_all();
    }

    /// Retire the active page and start a new one big enough for `needed`
    /// more bytes.
    ///
    /// An empty active page that cannot fit the record is rebuilt in place
    /// with a larger capacity instead of being sealed, so oversized items
    /// never strand empty pages on disk.
    fn roll_page(&self, write: &mut WriteState, needed: u64) -> Result<()> {
        let capacity = self.config.page_capacity.max(PAGE_HEADER_SIZE + needed);

        if write.entry.events.load(Ordering::Acquire) == 0 {
            let number = write.entry.number;
            let header = PageHeader::new(number, write.entry.first_seq);
            write.page = Arc::new(PageFile::create(
                self.store.page_path(number),
                capacity,
                &header,
            )?);
            write.offset = PAGE_HEADER_SIZE;
            debug!(page = number, capacity, "Rebuilt empty page for oversized item");
            return Ok(());
        }

        // Seal the current page: flush its data, persist its checkpoint with
        // the end-of-page flag, and hand it over to the ack tracker.
        write.page.flush()?;
        write.entry.full.store(true, Ordering::Release);
        let sealed = write.entry.number;

        let snapshot = {
            let mut acks = lock(&self.acks);
            acks.tracker.on_page_full(sealed);
            let snapshot = acks
                .tracker
                .page_state(sealed)
                .map(|state| (build_page_checkpoint(sealed, state), state.fully_acked()));
            if let Some((_, fully_acked)) = &snapshot {
                acks.tracker.mark_checkpointed(sealed);
                // Everything in the page was acked while it was still active.
                if *fully_acked {
                    acks.tracker.remove_page(sealed);
                }
            }
            snapshot
        };
        if let Some((cp, fully_acked)) = snapshot {
            self.write_page_checkpoint(sealed, &cp)?;
            if fully_acked {
                self.retire_page(sealed);
            }
        }

        let number = sealed + 1;
        let first_seq = write.next_seq;
        let path = self.store.page_path(number);
        let header = PageHeader::new(number, first_seq);
        let page = Arc::new(PageFile::create(&path, capacity, &header)?);
        let entry = Arc::new(PageEntry::new(number, first_seq, path));

        self.pages_write().push(Arc::clone(&entry));
        lock(&self.acks).tracker.add_page(number, first_seq);

        write.page = page;
        write.entry = entry;
        write.offset = PAGE_HEADER_SIZE;
        write.force_sync = true;
        info!(page = number, first_seq, "Rolled over to new page");
        Ok(())
    }

    /// Snapshot writer progress under the write mutex, then persist it.
    fn take_head_checkpoint(&self) -> Result<()> {
        let (page, head) = {
            let mut write = lock(&self.write);
            head_snapshot(&mut write)
        };
        self.write_head_checkpoint(&page, &head)
    }

    /// Flush the snapshotted page prefix and persist writer progress. Runs
    /// outside the write mutex; a snapshot older than what is already on disk
    /// is dropped so the head file never moves backwards.
    fn write_head_checkpoint(&self, page: &PageFile, head: &HeadCheckpoint) -> Result<()> {
        let mut io = lock(&self.checkpoint_io);
        if head.next_sequence < io.last_head_seq {
            return Ok(());
        }
        page.flush_range(0, head.write_offset)?;
        checkpoint::write_with_retry(&self.store.head_checkpoint_path(), &head.serialize())?;
        io.last_head_seq = head.next_sequence;
        Ok(())
    }

    fn write_page_checkpoint(&self, number: u64, cp: &PageCheckpoint) -> Result<()> {
        let _io = lock(&self.checkpoint_io);
        checkpoint::write_with_retry(&self.store.checkpoint_path(number), &cp.serialize())
    }

    // ---- ack path ----

    pub fn ack_runs(&self, runs: &[(u64, u64)]) -> Result<()> {
        ensure!(!self.is_closed(), ClosedSnafu);

        let mut reclaimable = Vec::new();
        let mut checkpoints = Vec::new();
        {
            let mut acks = lock(&self.acks);
            for &(start, end) in runs {
                reclaimable.extend(acks.tracker.ack_range(start, end));
                acks.dirty += end - start + 1;
            }

            if acks.dirty >= self.config.checkpoint_acks
                || acks.last_synced.elapsed() >= self.config.checkpoint_interval
            {
                checkpoints = snapshot_dirty_pages(&mut acks, &reclaimable);
            }

            for &number in &reclaimable {
                acks.tracker.remove_page(number);
            }
        }

        for (number, cp) in &checkpoints {
            self.write_page_checkpoint(*number, cp)?;
        }
        for &number in &reclaimable {
            self.retire_page(number);
        }

        self.space.notify_all();
        Ok(())
    }

    /// Drop a fully acknowledged page from the live set and hand it to the
    /// background reclaimer.
    fn retire_page(&self, number: u64) {
        self.pages_write().retain(|p| p.number != number);
        if let Some(reclaimer) = lock(&self.reclaimer).as_ref() {
            reclaimer.submit(number);
        }
    }

    // ---- read path ----

    pub fn read_batch(&self, max_items: usize, max_wait: Duration) -> Result<Vec<Item>> {
        if max_items == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + max_wait;
        let mut tail = lock(&self.tail);

        loop {
            ensure!(!self.is_closed(), ClosedSnafu);

            let mut items = Vec::new();

            // Redeliveries first, in sequence order.
            while items.len() < max_items {
                let Some(seq) = tail.requeue.pop_first() else {
                    break;
                };
                match self.read_seq(&mut tail, seq)? {
                    Some(payload) => items.push(Item { sequence: seq, payload }),
                    None => {
                        warn!(seq, "Dropping requeued sequence with no backing page");
                    }
                }
            }

            while items.len() < max_items {
                let seq = tail.cursor;
                match self.read_seq(&mut tail, seq)? {
                    Some(payload) => {
                        items.push(Item { sequence: seq, payload });
                        tail.cursor += 1;
                    }
                    None => break,
                }
            }

            if !items.is_empty() {
                return Ok(items);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(items);
            }

            tail = self
                .readable
                .wait_timeout(tail, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Read the record carrying `seq`, or `None` when it is not (yet)
    /// readable.
    fn read_seq(&self, tail: &mut TailState, seq: u64) -> Result<Option<Bytes>> {
        let entry = self.pages_read().iter().find(|p| p.contains(seq)).cloned();
        let Some(entry) = entry else {
            return Ok(None);
        };

        let cached = tail
            .cache
            .as_ref()
            .is_some_and(|c| c.page_number == entry.number && c.next_seq == seq);

        if !cached {
            let (view, _) = PageView::open(&entry.path, entry.number)?;
            let mut offset = PAGE_HEADER_SIZE;
            for _ in entry.first_seq..seq {
                offset += view.record_size_at(offset)?;
            }
            tail.cache = Some(TailCursor {
                page_number: entry.number,
                view,
                next_seq: seq,
                next_offset: offset,
            });
        }

        let Some(cache) = tail.cache.as_mut() else {
            return Ok(None);
        };
        let (payload, next) = cache.view.read_record_at(cache.next_offset)?;
        cache.next_seq = seq + 1;
        cache.next_offset = next;

        Ok(Some(payload))
    }

    /// Return undelivered-after-all sequences to the redelivery set.
    pub fn requeue_runs(&self, runs: &[(u64, u64)]) {
        {
            let mut tail = lock(&self.tail);
            for &(start, end) in runs {
                tail.requeue.insert(start, end);
            }
        }
        self.readable.notify_all();
    }

    // ---- lifecycle ----

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(dir = ?self.store.dir(), "Closing queue");

        drop(lock(&self.acks));
        self.space.notify_all();
        self.notify_readable();

        self.take_head_checkpoint()?;

        let checkpoints = {
            let mut acks = lock(&self.acks);
            snapshot_dirty_pages(&mut acks, &[])
        };
        for (number, cp) in &checkpoints {
            self.write_page_checkpoint(*number, cp)?;
        }

        if let Some(mut reclaimer) = lock(&self.reclaimer).take() {
            reclaimer.shutdown();
        }
        Ok(())
    }

    pub fn unacked_events(&self) -> u64 {
        lock(&self.acks).tracker.unacked_events()
    }

    pub fn unacked_bytes(&self) -> u64 {
        lock(&self.acks).tracker.unacked_bytes()
    }

    pub fn next_sequence(&self) -> u64 {
        lock(&self.write).next_seq
    }

    /// Lowest unacknowledged sequence, or the next sequence when the queue is
    /// fully drained.
    pub fn tail_sequence(&self) -> u64 {
        let tail = lock(&self.acks).tracker.lowest_unacked();
        tail.unwrap_or_else(|| self.next_sequence())
    }
}

/// Capture writer progress and reset the cadence counters. The caller writes
/// the checkpoint file after releasing the write mutex.
fn head_snapshot(write: &mut WriteState) -> (Arc<PageFile>, HeadCheckpoint) {
    write.dirty = 0;
    write.force_sync = false;
    write.last_synced = Instant::now();
    (
        Arc::clone(&write.page),
        HeadCheckpoint {
            page_number:   write.entry.number,
            next_sequence: write.next_seq,
            write_offset:  write.offset,
        },
    )
}

/// Snapshot every page with unsynced acks and reset their dirty counters,
/// skipping pages about to be deleted. The caller writes the checkpoint files
/// after releasing the ack mutex.
fn snapshot_dirty_pages(acks: &mut AckState, skip: &[u64]) -> Vec<(u64, PageCheckpoint)> {
    let mut checkpoints = Vec::new();
    for (number, _) in acks.tracker.dirty_pages() {
        if !skip.contains(&number)
            && let Some(state) = acks.tracker.page_state(number)
        {
            checkpoints.push((number, build_page_checkpoint(number, state)));
        }
        acks.tracker.mark_checkpointed(number);
    }

    acks.dirty = 0;
    acks.last_synced = Instant::now();
    checkpoints
}

fn build_page_checkpoint(number: u64, state: &PageAckState) -> PageCheckpoint {
    PageCheckpoint {
        page_number:    number,
        first_sequence: state.first_seq,
        event_count:    state.event_count,
        end_of_page:    state.end_of_page,
        acked:          state.acked.ranges().to_vec(),
    }
}

/// A durable, acknowledgement-tracking persisted queue.
///
/// Items are written through [`WriteClient`] handles, delivered at least once
/// through [`ReadClient`] batches, and retained on disk until acknowledged.
/// Dropping the queue closes it; pending checkpoints are flushed first.
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Open a queue directory, recovering any persisted state.
    pub(crate) fn open(config: QueueConfig) -> Result<Self> {
        let inner = recover(config)?;
        Ok(Self { inner })
    }

    pub fn write_client(&self) -> WriteClient {
        WriteClient::new(Arc::clone(&self.inner))
    }

    pub fn read_client(&self) -> ReadClient {
        ReadClient::new(Arc::clone(&self.inner))
    }

    /// Items written but not yet acknowledged.
    pub fn unacked_events(&self) -> u64 {
        self.inner.unacked_events()
    }

    /// On-disk bytes of unacknowledged items.
    pub fn unacked_bytes(&self) -> u64 {
        self.inner.unacked_bytes()
    }

    /// Sequence number the next write will receive.
    pub fn next_sequence(&self) -> u64 {
        self.inner.next_sequence()
    }

    /// Lowest unacknowledged sequence number.
    pub fn tail_sequence(&self) -> u64 {
        self.inner.tail_sequence()
    }

    /// Close the queue: flush checkpoints, stop the reclaimer, and wake any
    /// blocked clients. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!(error = %e, "Error closing queue on drop");
        }
    }
}

/// One page's recovered state after the scan pass.
struct ScannedPage {
    number:    u64,
    first_seq: u64,
    path:      PathBuf,
    scan:      PageScan,
    acked:     RangeSet,
}

/// Rebuild in-memory state from the queue directory.
///
/// Page data is authoritative: every surviving page is rescanned and
/// checkpoints only contribute ack progress. A checkpoint that claims more
/// than the scan found (a checkpoint written ahead of a lost flush) is
/// clamped to the scan with a warning, biasing toward redelivery.
fn recover(config: QueueConfig) -> Result<Arc<Inner>> {
    let store = PageStore::open(&config.dir)?;
    let dir_lock = DirLock::acquire(store.dir())?;
    store.remove_orphan_checkpoints()?;

    let head = match checkpoint::read_head(&store.head_checkpoint_path()) {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable head checkpoint");
            None
        }
    };

    let mut tracker = AckTracker::default();
    let mut entries: Vec<Arc<PageEntry>> = Vec::new();
    let mut next_seq = head.map_or(1, |h| h.next_sequence).max(1);

    // First pass: open and scan every page, dropping any whose header never
    // made it to disk. A crash between page allocation and the header flush
    // leaves a zero-filled file; it holds no records, so deleting it loses
    // nothing.
    let page_numbers = store.enumerate_pages()?;
    let mut scanned: Vec<ScannedPage> = Vec::new();
    for &number in &page_numbers {
        let path = store.page_path(number);
        let (view, header) = match PageView::open(&path, number) {
            Ok(opened) => opened,
            Err(Error::CorruptPage { .. }) => {
                warn!(page = number, "Deleting page left torn by an interrupted creation");
                store.delete_page(number)?;
                continue;
            }
            Err(e) => return Err(e),
        };
        let scan = view.scan()?;

        let cp = match checkpoint::read_page(&store.checkpoint_path(number)) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(page = number, error = %e, "Ignoring corrupt page checkpoint");
                None
            }
        };

        let acked = match cp {
            Some(cp) => {
                if cp.event_count > scan.events {
                    warn!(
                        page = number,
                        checkpointed = cp.event_count,
                        scanned = scan.events,
                        "Checkpoint ahead of page data, trusting the scan"
                    );
                }
                clamp_acked(&cp.acked, header.first_seq, scan.events)
            }
            None => RangeSet::default(),
        };

        next_seq = next_seq.max(header.first_seq + scan.events);
        scanned.push(ScannedPage {
            number,
            first_seq: header.first_seq,
            path,
            scan,
            acked,
        });
    }

    // Second pass: sealed pages that are empty or fully acked go straight to
    // deletion. The highest surviving page is always kept: it becomes the
    // active page.
    let survivors = scanned.len();
    for (idx, page) in scanned.into_iter().enumerate() {
        let is_last = idx + 1 == survivors;
        if !is_last && (page.scan.events == 0 || page.acked.count() == page.scan.events) {
            store.delete_page(page.number)?;
            continue;
        }

        let entry = Arc::new(PageEntry::new(page.number, page.first_seq, page.path));
        entry.events.store(page.scan.events, Ordering::Release);
        entry.data_end.store(page.scan.data_end, Ordering::Release);
        entry.full.store(!is_last, Ordering::Release);

        tracker.add_recovered_page(
            page.number,
            page.first_seq,
            &page.scan.record_sizes,
            page.acked,
            !is_last,
        );
        entries.push(entry);
    }

    // Reopen the highest page for appending, or start fresh. Page numbers
    // stay monotonic across restarts even when every old page was reclaimed.
    let (page, entry, offset) = match entries.last() {
        Some(entry) => {
            let (page, _) = PageFile::open(&entry.path, entry.number)?;
            (
                Arc::new(page),
                Arc::clone(entry),
                entry.data_end.load(Ordering::Acquire),
            )
        }
        None => {
            let number = page_numbers.last().map_or(1, |n| n + 1);
            let path = store.page_path(number);
            let header = PageHeader::new(number, next_seq);
            let page = Arc::new(PageFile::create(&path, config.page_capacity, &header)?);
            let entry = Arc::new(PageEntry::new(number, next_seq, path));
            tracker.add_page(number, next_seq);
            entries.push(Arc::clone(&entry));
            (page, entry, PAGE_HEADER_SIZE)
        }
    };

    let requeue = RangeSet::from_ranges(tracker.unacked_ranges());
    info!(
        dir = ?store.dir(),
        pages = entries.len(),
        next_seq,
        unacked = tracker.unacked_events(),
        "Queue recovered"
    );

    let reclaimer = Reclaimer::start(store.clone())?;
    let inner = Arc::new(Inner {
        config,
        store,
        _dir_lock: dir_lock,
        closed: AtomicBool::new(false),
        write: Mutex::new(WriteState {
            page,
            entry,
            next_seq,
            offset,
            dirty: 0,
            force_sync: false,
            last_synced: Instant::now(),
        }),
        acks: Mutex::new(AckState {
            tracker,
            reserved_bytes: 0,
            reserved_events: 0,
            dirty: 0,
            last_synced: Instant::now(),
        }),
        tail: Mutex::new(TailState {
            cursor: next_seq,
            requeue,
            cache: None,
        }),
        pages: RwLock::new(entries),
        space: Condvar::new(),
        readable: Condvar::new(),
        checkpoint_io: Mutex::new(CheckpointIo::default()),
        reclaimer: Mutex::new(Some(reclaimer)),
    });

    // Persist a fresh head checkpoint so the recovered position survives an
    // immediate crash.
    inner.take_head_checkpoint()?;

    Ok(inner)
}

/// Restrict checkpointed ack ranges to sequences the scan actually found.
fn clamp_acked(ranges: &[(u64, u64)], first_seq: u64, events: u64) -> RangeSet {
    if events == 0 {
        return RangeSet::default();
    }
    let last_seq = first_seq + events - 1;

    let mut set = RangeSet::default();
    for &(start, end) in ranges {
        if start > last_seq {
            continue;
        }
        set.insert(start, end.min(last_seq));
    }
    set
}

/// Convenience for tests and small tools: open with defaults.
pub fn open<P: AsRef<Path>>(dir: P) -> Result<Queue> {
    crate::QueueBuilder::new(dir.as_ref()).build()
}
