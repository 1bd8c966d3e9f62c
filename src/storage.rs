//! Storage abstraction consumed by the core.
//!
//! The core only ever reads storage. Persisting new entries and hard state
//! is the embedder's job: it drains them from a `Ready`, writes them
//! durably, and only then calls `advance`. `MemoryStorage` is the
//! in-memory implementation used by the tests and by embedders that keep
//! durability elsewhere.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::message::{ConfState, Entry, HardState, Snapshot};

/// Read contract the core drives.
///
/// `first_index` is one past the last index covered by the latest snapshot;
/// anything strictly below it has been compacted away. Implementations are
/// free to be concurrent-safe or not; the core itself is single-owner.
pub trait Storage {
    /// Persisted hard state and cluster membership, loaded at boot.
    fn initial_state(&self) -> (HardState, ConfState);

    /// Index of the first entry still present (snapshot index + 1).
    fn first_index(&self) -> u64;

    /// Index of the last persisted entry; `first_index - 1` when empty.
    fn last_index(&self) -> u64;

    /// Term of the entry at `index`. The snapshot position itself is still
    /// answerable; everything below it is `LogCompacted`.
    fn term(&self, index: u64) -> Result<u64>;

    /// Entries in `[lo, hi)`, cut off after `max_size` payload bytes but
    /// never empty when at least one entry is in range.
    fn entries(&self, lo: u64, hi: u64, max_size: u64) -> Result<Vec<Entry>>;

    /// The latest snapshot, for catching up a peer whose needed prefix is
    /// compacted.
    fn snapshot(&self) -> Snapshot;
}

/// No byte budget: take everything in range.
pub const NO_LIMIT: u64 = u64::MAX;

/// Truncate `entries` to fit `max_size` payload bytes, always keeping the
/// first entry so replication can make progress.
pub fn limit_size(entries: &mut Vec<Entry>, max_size: u64) {
    if entries.len() <= 1 {
        return;
    }
    let mut size = 0u64;
    let keep = entries
        .iter()
        .take_while(|e| {
            size = size.saturating_add(e.payload_size());
            size <= max_size
        })
        .count();
    entries.truncate(keep.max(1));
}

#[derive(Default)]
struct MemoryStorageCore {
    hard_state: HardState,
    snapshot: Snapshot,
    /// Entries with index greater than `snapshot.metadata.index`.
    entries: Vec<Entry>,
}

impl MemoryStorageCore {
    fn snap_index(&self) -> u64 {
        self.snapshot.metadata.index
    }

    fn first_index(&self) -> u64 {
        self.snap_index() + 1
    }

    fn last_index(&self) -> u64 {
        self.snap_index() + self.entries.len() as u64
    }

    fn term(&self, index: u64) -> Result<u64> {
        if index == self.snap_index() {
            return Ok(self.snapshot.metadata.term);
        }
        if index < self.snap_index() {
            return Err(Error::LogCompacted);
        }
        if index > self.last_index() {
            return Err(Error::OutOfBound);
        }
        Ok(self.entries[(index - self.first_index()) as usize].term)
    }

    fn append(&mut self, entries: &[Entry]) {
        let Some(first_new) = entries.first().map(|e| e.index) else {
            return;
        };
        // Drop any part already covered by the snapshot.
        let entries = if first_new < self.first_index() {
            let skip = (self.first_index() - first_new) as usize;
            if skip >= entries.len() {
                return;
            }
            &entries[skip..]
        } else {
            entries
        };
        let first_new = entries[0].index;
        assert!(
            first_new <= self.last_index() + 1,
            "appending {} would leave a gap after {}",
            first_new,
            self.last_index()
        );
        // Overlapping suffix replaces what is there.
        self.entries.truncate((first_new - self.first_index()) as usize);
        self.entries.extend_from_slice(entries);
    }

    fn compact(&mut self, compact_index: u64) -> Result<()> {
        if compact_index <= self.snap_index() {
            return Err(Error::LogCompacted);
        }
        if compact_index > self.last_index() {
            return Err(Error::OutOfBound);
        }
        let term = self.term(compact_index)?;
        let keep_from = (compact_index - self.first_index() + 1) as usize;
        self.entries.drain(..keep_from);
        self.snapshot.metadata.index = compact_index;
        self.snapshot.metadata.term = term;
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.metadata.index <= self.snap_index() {
            return Err(Error::LogCompacted);
        }
        self.hard_state.commit = snapshot.metadata.index;
        self.entries.clear();
        self.snapshot = snapshot;
        Ok(())
    }
}

/// In-memory `Storage`.
///
/// A cheaply cloneable handle over shared state, so the embedder that
/// persists `Ready` output and the `Raft` that reads it observe the same
/// log, the way a real disk store would behave.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    core: Arc<RwLock<MemoryStorageCore>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    fn rl(&self) -> RwLockReadGuard<'_, MemoryStorageCore> {
        self.core.read().unwrap()
    }

    fn wl(&self) -> RwLockWriteGuard<'_, MemoryStorageCore> {
        self.core.write().unwrap()
    }

    /// Append entries, replacing any overlapping suffix. Panics if the
    /// append would leave a gap; the caller must feed `Ready` output in
    /// order.
    pub fn append(&self, entries: &[Entry]) {
        self.wl().append(entries);
    }

    pub fn set_hard_state(&self, hard_state: HardState) {
        self.wl().hard_state = hard_state;
    }

    /// Discard entries up to and including `compact_index`, which becomes
    /// the snapshot position.
    pub fn compact(&self, compact_index: u64) -> Result<()> {
        self.wl().compact(compact_index)
    }

    /// Install a snapshot received from the leader, discarding the log.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.wl().apply_snapshot(snapshot)
    }
}

impl Storage for MemoryStorage {
    fn initial_state(&self) -> (HardState, ConfState) {
        let core = self.rl();
        (core.hard_state, core.snapshot.metadata.conf_state.clone())
    }

    fn first_index(&self) -> u64 {
        self.rl().first_index()
    }

    fn last_index(&self) -> u64 {
        self.rl().last_index()
    }

    fn term(&self, index: u64) -> Result<u64> {
        self.rl().term(index)
    }

    fn entries(&self, lo: u64, hi: u64, max_size: u64) -> Result<Vec<Entry>> {
        let core = self.rl();
        if lo < core.first_index() {
            return Err(Error::LogCompacted);
        }
        if hi > core.last_index() + 1 {
            return Err(Error::OutOfBound);
        }
        let offset = core.first_index();
        let mut entries = core.entries[(lo - offset) as usize..(hi - offset) as usize].to_vec();
        limit_size(&mut entries, max_size);
        Ok(entries)
    }

    fn snapshot(&self) -> Snapshot {
        self.rl().snapshot.clone()
    }
}
