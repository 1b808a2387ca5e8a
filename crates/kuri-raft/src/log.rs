//! In-memory replicated log with a compactable base.
//!
//! Stored entries cover indexes `base_index + 1 ..= base_index + count`;
//! everything at or below `(base_index, base_term)` has been folded into a
//! snapshot. References returned by [`RaftLog::get`] are invalidated by any
//! mutating call — the borrow checker enforces what the design requires.

use crate::types::{Entry, EntryKind, LogIndex, Term};
use bytes::Bytes;

/// The replicated log.
#[derive(Debug, Default)]
pub struct RaftLog {
    base_index: LogIndex,
    base_term: Term,
    entries: Vec<Entry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry; its index is always exactly `last_index + 1`.
    pub fn append(&mut self, term: Term, kind: EntryKind, payload: Bytes) -> LogIndex {
        let index = self.last_index().next();
        self.entries.push(Entry::new(term, index, kind, payload));
        index
    }

    /// Append an entry that already carries its index (replication path).
    ///
    /// Panics in debug builds if the index does not line up; the caller must
    /// have resolved conflicts first.
    pub fn append_entry(&mut self, entry: Entry) {
        debug_assert_eq!(entry.index, self.last_index().next());
        self.entries.push(entry);
    }

    /// O(1) lookup. `None` below the base or past the end.
    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index <= self.base_index {
            return None;
        }
        self.entries.get((index.as_u64() - self.base_index.as_u64() - 1) as usize)
    }

    /// Term at `index`: the base term at the base index, the entry's term if
    /// present, 0 otherwise ("unknown").
    pub fn term_at(&self, index: LogIndex) -> Term {
        if index == LogIndex::ZERO {
            return Term::ZERO;
        }
        if index == self.base_index {
            return self.base_term;
        }
        self.get(index).map(|e| e.term).unwrap_or(Term::ZERO)
    }

    pub fn last_index(&self) -> LogIndex {
        LogIndex(self.base_index.as_u64() + self.entries.len() as u64)
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(self.base_term)
    }

    pub fn base_index(&self) -> LogIndex {
        self.base_index
    }

    pub fn base_term(&self) -> Term {
        self.base_term
    }

    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Entries starting at `from`, at most `max`. Empty when `from` is past
    /// the end or at/below the base.
    pub fn entries_from(&self, from: LogIndex, max: usize) -> &[Entry] {
        if from <= self.base_index || from > self.last_index() {
            return &[];
        }
        let start = (from.as_u64() - self.base_index.as_u64() - 1) as usize;
        let end = start.saturating_add(max).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Remove entries with `index > after`. Payloads drop with the entries.
    pub fn truncate_after(&mut self, after: LogIndex) {
        if after >= self.last_index() {
            return;
        }
        let keep = after
            .as_u64()
            .saturating_sub(self.base_index.as_u64()) as usize;
        self.entries.truncate(keep);
    }

    /// Remove entries with `index < before`; the base moves to `before - 1`.
    ///
    /// Used after a snapshot covers the prefix. `before` past the end clears
    /// the whole log.
    pub fn truncate_before(&mut self, before: LogIndex) {
        if before <= self.base_index.next() {
            return;
        }
        let before = LogIndex(before.as_u64().min(self.last_index().as_u64() + 1));
        let new_base = before.prev();
        let new_base_term = self.term_at(new_base);

        let drop = (new_base.as_u64() - self.base_index.as_u64()) as usize;
        self.entries.drain(..drop.min(self.entries.len()));
        self.base_index = new_base;
        self.base_term = new_base_term;
    }

    /// Drop everything and restart the log at a snapshot point.
    pub fn reset_to(&mut self, base_index: LogIndex, base_term: Term) {
        self.entries.clear();
        self.base_index = base_index;
        self.base_term = base_term;
    }
}
