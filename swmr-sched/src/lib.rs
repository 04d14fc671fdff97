//! Process-wide end-of-tick scheduler.
//!
//! A single priority queue, ordered by ascending deadline, holds every open
//! SWMR file (writer or reader role) in this process. `first_is_writer` and
//! `first_end_of_tick` are not separate globals here — they are getters on
//! the scheduler singleton, so there is exactly one source of truth for the
//! queue's head.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Opaque identifier for an open SWMR file handle.
pub type FileId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Writer,
    Reader,
}

/// One scheduled file's position in the EOT queue.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub file: FileId,
    pub role: Role,
    pub tick: u64,
    pub end_of_tick: Instant,
}

/// Ordered queue of open SWMR files, ascending by `end_of_tick`. Ties are
/// broken FIFO: a new entry with an equal deadline to an existing one is
/// inserted after it.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: VecDeque<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { entries: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a file into the queue. Walks from the tail to find the first
    /// entry whose deadline is `<=` this one's and inserts right after it,
    /// which preserves FIFO among equal deadlines.
    pub fn insert(&mut self, entry: Entry) {
        let position = self
            .entries
            .iter()
            .rposition(|existing| existing.end_of_tick <= entry.end_of_tick);

        match position {
            Some(idx) => self.entries.insert(idx + 1, entry),
            None => self.entries.push_front(entry),
        }

        tracing::trace!(file = entry.file, ?entry.role, "scheduler: inserted");
    }

    /// Remove a file from the queue by identity, wherever it sits.
    pub fn remove(&mut self, file: FileId) -> Option<Entry> {
        let idx = self.entries.iter().position(|e| e.file == file)?;
        let removed = self.entries.remove(idx);
        if let Some(entry) = removed {
            tracing::trace!(file = entry.file, "scheduler: removed");
        }
        removed
    }

    /// Remove and reinsert a file with a new tick/deadline (what the writer
    /// and reader engines do at the end of every EOT). Equivalent to
    /// `remove` then `insert`, exposed as one call because that is the only
    /// way either engine uses these two primitives.
    pub fn reinsert(&mut self, file: FileId, role: Role, tick: u64, end_of_tick: Instant) {
        self.remove(file);
        self.insert(Entry { file, role, tick, end_of_tick });
    }

    pub fn head(&self) -> Option<Entry> {
        self.entries.front().copied()
    }

    pub fn first_is_writer(&self) -> Option<bool> {
        self.head().map(|entry| entry.role == Role::Writer)
    }

    pub fn first_end_of_tick(&self) -> Option<Instant> {
        self.head().map(|entry| entry.end_of_tick)
    }

    /// Is the head of the queue due relative to `now`?
    pub fn is_due(&self, now: Instant) -> bool {
        self.first_end_of_tick().is_some_and(|deadline| now >= deadline)
    }
}

static GLOBAL: OnceLock<Mutex<Scheduler>> = OnceLock::new();

fn global() -> &'static Mutex<Scheduler> {
    GLOBAL.get_or_init(|| Mutex::new(Scheduler::new()))
}

/// Insert a file into the process-wide scheduler.
pub fn insert(entry: Entry) {
    global().lock().insert(entry);
}

/// Remove a file from the process-wide scheduler.
pub fn remove(file: FileId) -> Option<Entry> {
    global().lock().remove(file)
}

/// Remove and reinsert a file with a new tick/deadline.
pub fn reinsert(file: FileId, role: Role, tick: u64, end_of_tick: Instant) {
    global().lock().reinsert(file, role, tick, end_of_tick);
}

/// Is the process-wide queue's head due relative to `now`?
pub fn is_due(now: Instant) -> bool {
    global().lock().is_due(now)
}

pub fn head() -> Option<Entry> {
    global().lock().head()
}

/// The API-entry/exit depth counter driving the trampoline: dispatch is only
/// ever considered on a `0 -> 1` entry transition or a `1 -> 0` exit
/// transition, never on reentrant calls in between.
static DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Record entry into a public API call. Returns `true` iff this call is the
/// outermost one (a `0 -> 1` transition), the only case in which the caller
/// should consider dispatching a due EOT.
pub fn enter_api() -> bool {
    DEPTH.fetch_add(1, Ordering::AcqRel) == 0
}

/// Record exit from a public API call. Returns `true` iff this call is the
/// one returning to zero outstanding calls (a `1 -> 0` transition).
pub fn exit_api() -> bool {
    DEPTH.fetch_sub(1, Ordering::AcqRel) == 1
}
