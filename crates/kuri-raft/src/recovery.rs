//! Crash recovery: rebuild node state from the durable store at open.
//!
//! Order matters: snapshot first (it sets the log base and seeds the state
//! machine), then the state file (absence means a fresh node), then the log
//! file replayed into memory with a strict index-continuity check.

use crate::error::{RaftError, Result};
use crate::raft::Raft;
use crate::types::{Entry, EntryKind, LogIndex, NodeId, Term};

/// What recovery found on disk.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub had_snapshot: bool,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub log_entries: u64,
    pub last_index: LogIndex,
}

impl Raft {
    pub(crate) fn recover(&mut self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let Some(store) = self.store.as_mut() else {
            return Ok(report);
        };

        // Step 1: snapshot, if any. Sets the log base and restores the
        // state machine; commit and applied resume from its last index.
        if store.snapshot_exists() {
            let snap = store.read_snapshot()?;
            self.log
                .reset_to(LogIndex(snap.meta.last_index), Term(snap.meta.last_term));
            self.commit_index = LogIndex(snap.meta.last_index);
            self.last_applied = LogIndex(snap.meta.last_index);
            if let Some(sm) = self.state_machine.as_mut() {
                sm.restore(&snap.data);
            }
            report.had_snapshot = true;
        }

        // Step 2: hard state. A missing file is a fresh node, not an error.
        match store.load_state() {
            Ok((term, voted_for)) => {
                self.current_term = Term(term);
                self.voted_for = voted_for.map(NodeId);
            }
            Err(kuri_store::StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        report.term = self.current_term;
        report.voted_for = self.voted_for;

        // Step 3: replay the log. Records the snapshot already covers are
        // skipped; everything else must line up exactly.
        let records = store.read_log()?;
        for record in records {
            if record.index <= self.log.base_index().as_u64() {
                continue;
            }
            let expected = self.log.last_index().next();
            if record.index != expected.as_u64() {
                return Err(RaftError::Corruption {
                    reason: format!(
                        "log record index {} where {} was expected",
                        record.index, expected
                    ),
                });
            }
            // The on-disk record does not store the entry kind; replayed
            // entries default to Command.
            self.log.append_entry(Entry::new(
                Term(record.term),
                LogIndex(record.index),
                EntryKind::Command,
                record.payload,
            ));
            report.log_entries += 1;
        }
        report.last_index = self.log.last_index();

        tracing::info!(
            term = %report.term,
            entries = report.log_entries,
            last_index = %report.last_index,
            had_snapshot = report.had_snapshot,
            "recovered from disk"
        );
        Ok(report)
    }
}
