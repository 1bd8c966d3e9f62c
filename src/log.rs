//! The logical log: the persisted prefix in `Storage` plus the unstable
//! suffix, addressed as one contiguous sequence.
//!
//! `committed` is the highest index known replicated on a quorum;
//! `applied` is how far the embedder has handed entries to its state
//! machine. The caller keeps `applied ≤ committed`; the core keeps
//! everything else.

use std::cmp;

use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Entry, Snapshot};
use crate::storage::{limit_size, Storage};
use crate::unstable::Unstable;

pub struct RaftLog<T: Storage> {
    pub storage: T,
    pub unstable: Unstable,
    pub committed: u64,
    pub applied: u64,
    /// A received snapshot the embedder has not yet installed into storage.
    /// While pending it defines the log's view of the past.
    pending_snapshot: Option<Snapshot>,
}

impl<T: Storage> RaftLog<T> {
    /// A log continuing wherever `storage` left off.
    pub fn new(storage: T) -> RaftLog<T> {
        let offset = storage.last_index() + 1;
        RaftLog {
            storage,
            unstable: Unstable::new(offset),
            committed: 0,
            applied: 0,
            pending_snapshot: None,
        }
    }

    pub fn first_index(&self) -> u64 {
        if let Some(snap) = &self.pending_snapshot {
            return snap.metadata.index + 1;
        }
        self.storage.first_index()
    }

    pub fn last_index(&self) -> u64 {
        if let Some(index) = self.unstable.last_index() {
            return index;
        }
        if let Some(snap) = &self.pending_snapshot {
            return snap.metadata.index;
        }
        self.storage.last_index()
    }

    pub fn last_term(&self) -> u64 {
        self.term(self.last_index())
            .expect("term of own last index must be known")
    }

    /// Term of the entry at `index`; 0 at the empty sentinel index.
    pub fn term(&self, index: u64) -> Result<u64> {
        // A truncating append can leave the unstable suffix ending below
        // storage; bound by the logical log, not by what storage holds.
        if index > self.last_index() {
            return Err(Error::OutOfBound);
        }
        if let Some(term) = self.unstable.maybe_term(index) {
            return Ok(term);
        }
        if let Some(snap) = &self.pending_snapshot {
            return match index.cmp(&snap.metadata.index) {
                cmp::Ordering::Equal => Ok(snap.metadata.term),
                cmp::Ordering::Less => Err(Error::LogCompacted),
                cmp::Ordering::Greater => Err(Error::OutOfBound),
            };
        }
        self.storage.term(index)
    }

    pub fn match_term(&self, index: u64, term: u64) -> bool {
        self.term(index).map(|t| t == term).unwrap_or(false)
    }

    /// Index of the first entry whose term disagrees with ours (entries
    /// past our last index always disagree), or 0 when nothing conflicts.
    pub fn find_conflict(&self, entries: &[Entry]) -> u64 {
        for entry in entries {
            if !self.match_term(entry.index, entry.term) {
                if entry.index <= self.last_index() {
                    debug!(
                        index = entry.index,
                        existing_term = self.term(entry.index).unwrap_or(0),
                        conflicting_term = entry.term,
                        "found log conflict"
                    );
                }
                return entry.index;
            }
        }
        0
    }

    /// AppendEntries core: verify the log matches at `(prev_index,
    /// prev_term)`, resolve conflicts, append what is new, and pull the
    /// commit index forward. Returns the index of the last new entry, or
    /// `None` when the match check fails.
    pub fn maybe_append(
        &mut self,
        prev_index: u64,
        prev_term: u64,
        leader_commit: u64,
        entries: &[Entry],
    ) -> Option<u64> {
        if !self.match_term(prev_index, prev_term) {
            return None;
        }
        let last_new = prev_index + entries.len() as u64;
        match self.find_conflict(entries) {
            0 => {}
            conflict => {
                assert!(
                    conflict > self.committed,
                    "entry {} conflicts with committed entry {}",
                    conflict,
                    self.committed
                );
                let start = (conflict - prev_index - 1) as usize;
                self.append(&entries[start..]);
            }
        }
        self.commit_to(cmp::min(leader_commit, last_new));
        Some(last_new)
    }

    /// Append entries after conflict resolution. The suffix must sit above
    /// the commit index; rewriting committed entries is a bug.
    pub fn append(&mut self, entries: &[Entry]) -> u64 {
        if let Some(first) = entries.first() {
            assert!(
                first.index > self.committed,
                "appending {} would rewrite committed entry {}",
                first.index,
                self.committed
            );
            self.unstable.truncate_and_append(entries);
        }
        self.last_index()
    }

    /// Advance the commit index. Moving it backwards is ignored (stale
    /// leader information); moving it past the last index is a bug.
    pub fn commit_to(&mut self, to_commit: u64) {
        if to_commit <= self.committed {
            return;
        }
        assert!(
            to_commit <= self.last_index(),
            "commit {} out of range [last index {}]",
            to_commit,
            self.last_index()
        );
        self.committed = to_commit;
        debug!(committed = to_commit, "commit index advanced");
    }

    /// The embedder applied entries through `index`.
    pub fn applied_to(&mut self, index: u64) {
        if index == 0 {
            return;
        }
        assert!(
            index <= self.committed && index >= self.applied,
            "applied({}) must be in [{}, {}]",
            index,
            self.applied,
            self.committed
        );
        self.applied = index;
    }

    /// The embedder persisted unstable entries through `(index, term)`.
    pub fn stable_to(&mut self, index: u64, term: u64) {
        self.unstable.stable_to(index, term);
    }

    /// The embedder installed the pending snapshot into storage.
    pub fn stable_snap_to(&mut self, index: u64) {
        if let Some(snap) = &self.pending_snapshot {
            if snap.metadata.index == index {
                self.pending_snapshot = None;
            }
        }
    }

    /// Contiguous entries in `[lo, hi)`, reading storage then unstable,
    /// bounded by `max_size` payload bytes.
    pub fn slice(&self, lo: u64, hi: u64, max_size: u64) -> Result<Vec<Entry>> {
        if lo == hi {
            return Ok(Vec::new());
        }
        assert!(lo < hi, "invalid slice [{}, {})", lo, hi);
        if lo < self.first_index() {
            return Err(Error::LogCompacted);
        }
        if hi > self.last_index() + 1 {
            return Err(Error::OutOfBound);
        }

        let mut entries = Vec::new();
        if lo < self.unstable.offset {
            let stable_hi = cmp::min(hi, self.unstable.offset);
            let stable = self.storage.entries(lo, stable_hi, max_size)?;
            // Storage cut the read short for size; don't go further.
            if (stable.len() as u64) < stable_hi - lo {
                return Ok(stable);
            }
            entries = stable;
        }
        if hi > self.unstable.offset {
            let unstable_lo = cmp::max(lo, self.unstable.offset);
            entries.extend_from_slice(self.unstable.slice(unstable_lo, hi));
        }
        limit_size(&mut entries, max_size);
        Ok(entries)
    }

    /// Entries awaiting persistence, for the `Ready` bundle.
    pub fn unstable_entries(&self) -> &[Entry] {
        &self.unstable.entries
    }

    /// The snapshot awaiting installation, for the `Ready` bundle.
    pub fn pending_snapshot(&self) -> Option<&Snapshot> {
        self.pending_snapshot.as_ref()
    }

    /// Committed entries not yet handed to the state machine.
    pub fn next_committed_entries(&self, max_size: u64) -> Vec<Entry> {
        let lo = cmp::max(self.applied + 1, self.first_index());
        let hi = self.committed + 1;
        if lo >= hi {
            return Vec::new();
        }
        self.slice(lo, hi, max_size)
            .expect("committed entries must be readable")
    }

    /// Vote check: is a candidate with this last entry at least as
    /// up-to-date as us?
    pub fn is_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        last_term > self.last_term()
            || (last_term == self.last_term() && last_index >= self.last_index())
    }

    /// Replace the log with a snapshot's view of the world.
    pub fn restore(&mut self, snapshot: Snapshot) {
        debug!(
            index = snapshot.metadata.index,
            term = snapshot.metadata.term,
            committed = self.committed,
            "restoring log from snapshot"
        );
        self.committed = snapshot.metadata.index;
        self.unstable.restore(snapshot.metadata.index);
        self.pending_snapshot = Some(snapshot);
    }
}
