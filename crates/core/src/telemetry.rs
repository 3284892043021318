// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-local timers and counters.
//!
//! Each thread carries a context with one slot per [`TimerId`] and
//! [`CounterId`]. Timers nest: `start`/`stop` keep a recursion count and
//! only the outermost interval is recorded. When a thread exits (its
//! context is dropped) the partial sums merge into process-wide final
//! blocks under one global mutex; ids flagged for per-thread events emit a
//! thread-scoped JSON event at that point. The main thread calls
//! [`finalize`] before exit to merge its own block and emit the summary.

use std::cell::RefCell;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

use crate::jsonw::JsonWriter;

/// Emission target; a subscriber can route or silence telemetry separately
/// from diagnostic logging.
const TARGET: &str = "quarry::telemetry";

/// Fixed per-thread timers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerId {
    /// One IPC request/response exchange, handler included.
    IpcRequest,
    /// One object-info or read through the store facade.
    OdbLookup,
    /// Inflating a loose object body.
    LooseInflate,
    /// Reconstructing a packed entry, delta chain included.
    PackExpand,
    /// Publishing one watcher batch.
    WatcherPublish,
    /// A client query waiting on its cookie rendezvous.
    CookieWait,
}

/// Fixed per-thread monotonic counters.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CounterId {
    /// Lookups entering the store facade.
    OdbLookups,
    /// Objects served from loose files.
    LooseReads,
    /// Objects served from packs.
    PackReads,
    /// Promisor-remote fetch attempts.
    PromisorFetches,
    /// Connections accepted by the IPC listener.
    IpcAccepted,
    /// Connections dropped because the worker FIFO was full.
    IpcDropped,
    /// Requests served to completion.
    IpcRequests,
    /// Raw filesystem events observed.
    WatcherEvents,
    /// Batches published.
    WatcherBatches,
    /// Forced resyncs (overflow, unmount, stale-token floor).
    ForceResyncs,
}

const TIMERS: [TimerId; 6] = [
    TimerId::IpcRequest,
    TimerId::OdbLookup,
    TimerId::LooseInflate,
    TimerId::PackExpand,
    TimerId::WatcherPublish,
    TimerId::CookieWait,
];

const COUNTERS: [CounterId; 10] = [
    CounterId::OdbLookups,
    CounterId::LooseReads,
    CounterId::PackReads,
    CounterId::PromisorFetches,
    CounterId::IpcAccepted,
    CounterId::IpcDropped,
    CounterId::IpcRequests,
    CounterId::WatcherEvents,
    CounterId::WatcherBatches,
    CounterId::ForceResyncs,
];

impl TimerId {
    fn index(self) -> usize {
        match self {
            TimerId::IpcRequest => 0,
            TimerId::OdbLookup => 1,
            TimerId::LooseInflate => 2,
            TimerId::PackExpand => 3,
            TimerId::WatcherPublish => 4,
            TimerId::CookieWait => 5,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TimerId::IpcRequest => "ipc_request",
            TimerId::OdbLookup => "odb_lookup",
            TimerId::LooseInflate => "loose_inflate",
            TimerId::PackExpand => "pack_expand",
            TimerId::WatcherPublish => "watcher_publish",
            TimerId::CookieWait => "cookie_wait",
        }
    }

    /// Whether this timer also emits a thread-scoped event at thread exit.
    fn want_per_thread_events(self) -> bool {
        matches!(self, TimerId::IpcRequest | TimerId::WatcherPublish)
    }
}

impl CounterId {
    fn index(self) -> usize {
        match self {
            CounterId::OdbLookups => 0,
            CounterId::LooseReads => 1,
            CounterId::PackReads => 2,
            CounterId::PromisorFetches => 3,
            CounterId::IpcAccepted => 4,
            CounterId::IpcDropped => 5,
            CounterId::IpcRequests => 6,
            CounterId::WatcherEvents => 7,
            CounterId::WatcherBatches => 8,
            CounterId::ForceResyncs => 9,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CounterId::OdbLookups => "odb_lookups",
            CounterId::LooseReads => "loose_reads",
            CounterId::PackReads => "pack_reads",
            CounterId::PromisorFetches => "promisor_fetches",
            CounterId::IpcAccepted => "ipc_accepted",
            CounterId::IpcDropped => "ipc_dropped",
            CounterId::IpcRequests => "ipc_requests",
            CounterId::WatcherEvents => "watcher_events",
            CounterId::WatcherBatches => "watcher_batches",
            CounterId::ForceResyncs => "force_resyncs",
        }
    }

    fn want_per_thread_events(self) -> bool {
        matches!(self, CounterId::WatcherEvents | CounterId::IpcDropped)
    }
}

#[derive(Clone, Copy, Default)]
struct TimerSlot {
    recursion: u32,
    started_at: Option<Instant>,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    interval_count: u64,
}

impl TimerSlot {
    fn record(&mut self, ns: u64) {
        self.total_ns = self.total_ns.saturating_add(ns);
        self.max_ns = self.max_ns.max(ns);
        self.min_ns = if self.interval_count == 0 { ns } else { self.min_ns.min(ns) };
        self.interval_count += 1;
    }

    fn merge(&mut self, other: &TimerSlot) {
        if other.interval_count == 0 {
            return;
        }
        self.total_ns = self.total_ns.saturating_add(other.total_ns);
        self.max_ns = self.max_ns.max(other.max_ns);
        self.min_ns = if self.interval_count == 0 {
            other.min_ns
        } else {
            self.min_ns.min(other.min_ns)
        };
        self.interval_count += other.interval_count;
    }
}

struct ThreadBlock {
    timers: [TimerSlot; TIMERS.len()],
    counters: [u64; COUNTERS.len()],
}

impl ThreadBlock {
    fn new() -> Self {
        Self {
            timers: [TimerSlot::default(); TIMERS.len()],
            counters: [0; COUNTERS.len()],
        }
    }

    fn is_quiet(&self) -> bool {
        self.timers.iter().all(|t| t.interval_count == 0)
            && self.counters.iter().all(|c| *c == 0)
    }
}

impl Drop for ThreadBlock {
    fn drop(&mut self) {
        merge_into_final(self, &thread_label());
    }
}

thread_local! {
    static BLOCK: RefCell<ThreadBlock> = RefCell::new(ThreadBlock::new());
}

#[derive(Default)]
struct FinalBlocks {
    timers: [TimerSlot; TIMERS.len()],
    counters: [u64; COUNTERS.len()],
}

fn final_blocks() -> &'static Mutex<FinalBlocks> {
    static FINAL: OnceLock<Mutex<FinalBlocks>> = OnceLock::new();
    FINAL.get_or_init(|| Mutex::new(FinalBlocks::default()))
}

fn thread_label() -> String {
    std::thread::current().name().unwrap_or("unnamed").to_string()
}

/// Begin (or nest into) a timed interval on this thread.
pub fn timer_start(id: TimerId) {
    BLOCK.with(|b| {
        let mut b = b.borrow_mut();
        let slot = &mut b.timers[id.index()];
        slot.recursion += 1;
        if slot.recursion == 1 {
            slot.started_at = Some(Instant::now());
        }
    });
}

/// Leave a timed interval; only the outermost stop records.
pub fn timer_stop(id: TimerId) {
    BLOCK.with(|b| {
        let mut b = b.borrow_mut();
        let slot = &mut b.timers[id.index()];
        debug_assert!(slot.recursion > 0, "timer_stop without start: {id:?}");
        slot.recursion = slot.recursion.saturating_sub(1);
        if slot.recursion == 0 {
            if let Some(t0) = slot.started_at.take() {
                let ns = t0.elapsed().as_nanos().min(u64::MAX as u128) as u64;
                slot.record(ns);
            }
        }
    });
}

/// RAII interval: starts on construction, stops on drop.
#[must_use = "the interval stops when the guard drops"]
pub struct TimerGuard {
    id: TimerId,
}

/// Time a region for the lifetime of the returned guard.
pub fn timer(id: TimerId) -> TimerGuard {
    timer_start(id);
    TimerGuard { id }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        timer_stop(self.id);
    }
}

/// Bump a monotonic counter on this thread.
pub fn counter_add(id: CounterId, value: u64) {
    BLOCK.with(|b| {
        let mut b = b.borrow_mut();
        b.counters[id.index()] = b.counters[id.index()].saturating_add(value);
    });
}

fn merge_into_final(block: &ThreadBlock, thread: &str) {
    if block.is_quiet() {
        return;
    }
    let mut fin = final_blocks().lock();
    for (i, slot) in block.timers.iter().enumerate() {
        fin.timers[i].merge(slot);
    }
    for (i, v) in block.counters.iter().enumerate() {
        fin.counters[i] = fin.counters[i].saturating_add(*v);
    }
    drop(fin);

    // Thread-scoped events for the flagged ids, emitted outside the lock.
    for id in TIMERS {
        let slot = &block.timers[id.index()];
        if id.want_per_thread_events() && slot.interval_count > 0 {
            emit_timer_event("timer_thread", thread, id, slot);
        }
    }
    for id in COUNTERS {
        let v = block.counters[id.index()];
        if id.want_per_thread_events() && v > 0 {
            emit_counter_event("counter_thread", thread, id, v);
        }
    }
}

fn emit_timer_event(event: &str, thread: &str, id: TimerId, slot: &TimerSlot) {
    let mut jw = JsonWriter::object_begin(false);
    jw.object_string("event", event);
    jw.object_string("thread", thread);
    jw.object_string("name", id.name());
    jw.object_int("intervals", slot.interval_count as i64);
    jw.object_int("total_ns", slot.total_ns as i64);
    jw.object_int("min_ns", slot.min_ns as i64);
    jw.object_int("max_ns", slot.max_ns as i64);
    jw.end();
    tracing::info!(target: TARGET, "{}", jw.as_str());
}

fn emit_counter_event(event: &str, thread: &str, id: CounterId, value: u64) {
    let mut jw = JsonWriter::object_begin(false);
    jw.object_string("event", event);
    jw.object_string("thread", thread);
    jw.object_string("name", id.name());
    jw.object_int("value", value as i64);
    jw.end();
    tracing::info!(target: TARGET, "{}", jw.as_str());
}

/// Merge the calling thread's block and emit the process-wide summary.
///
/// Meant for the main thread on the way out; worker threads merge
/// automatically when they exit.
pub fn finalize() {
    BLOCK.with(|b| {
        let mut b = b.borrow_mut();
        let done = std::mem::replace(&mut *b, ThreadBlock::new());
        // The replaced block merges via Drop right here; the fresh block
        // stays quiet so the thread-local destructor has nothing to add.
        drop(done);
    });

    let fin = final_blocks().lock();
    let mut jw = JsonWriter::object_begin(false);
    jw.object_string("event", "summary");
    jw.object_inline_begin_object("timers");
    for id in TIMERS {
        let slot = &fin.timers[id.index()];
        if slot.interval_count == 0 {
            continue;
        }
        let mut sub = JsonWriter::object_begin(false);
        sub.object_int("intervals", slot.interval_count as i64);
        sub.object_int("total_ns", slot.total_ns as i64);
        sub.object_int("min_ns", slot.min_ns as i64);
        sub.object_int("max_ns", slot.max_ns as i64);
        sub.end();
        jw.object_sub_jw(id.name(), &sub);
    }
    jw.end();
    jw.object_inline_begin_object("counters");
    for id in COUNTERS {
        let v = fin.counters[id.index()];
        if v > 0 {
            jw.object_int(id.name(), v as i64);
        }
    }
    jw.end();
    jw.end();
    tracing::info!(target: TARGET, "{}", jw.as_str());
}

/// Test-visible snapshot of one timer's merged totals.
#[cfg(any(test, feature = "test-support"))]
pub fn timer_snapshot(id: TimerId) -> (u64, u64) {
    let fin = final_blocks().lock();
    let slot = &fin.timers[id.index()];
    (slot.interval_count, slot.total_ns)
}

/// Test-visible snapshot of one counter's merged total.
#[cfg(any(test, feature = "test-support"))]
pub fn counter_snapshot(id: CounterId) -> u64 {
    let fin = final_blocks().lock();
    fin.counters[id.index()]
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
