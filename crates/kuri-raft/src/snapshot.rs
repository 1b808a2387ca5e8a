//! Snapshot creation, installation, and log compaction.
//!
//! Create: serialize the state machine at `last_applied`, write the snapshot
//! file atomically, then drop the covered log prefix in memory and on disk.
//! Install: a follower too far behind receives the whole state, discards its
//! log, and restarts at the snapshot point.
//!
//! Auto-compaction runs after apply once the log holds more than
//! `auto_compaction_threshold` entries; it is silent when no state machine or
//! data dir is attached or nothing has been applied yet.

use crate::error::{RaftError, Result};
use crate::raft::Raft;
use crate::rpc::{InstallSnapshot, InstallSnapshotResponse, Message};
use crate::types::{LogIndex, NodeId, Role};
use kuri_store::LogRecord;

impl Raft {
    /// Snapshot the state machine at `last_applied` and compact the log.
    ///
    /// Silently a no-op when there is nothing to snapshot (no state machine,
    /// no data dir, or nothing applied), mirroring the auto-compaction path.
    pub fn create_snapshot(&mut self) -> Result<()> {
        let compact_index = self.last_applied;
        if compact_index == LogIndex::ZERO || compact_index <= self.log.base_index() {
            return Ok(());
        }
        let compact_term = self.log.term_at(compact_index);

        let (Some(sm), Some(store)) = (self.state_machine.as_mut(), self.store.as_mut()) else {
            return Ok(());
        };
        let state = sm.snapshot().map_err(|e| RaftError::SnapshotFailed {
            reason: e.to_string(),
        })?;
        store.write_snapshot(compact_index.as_u64(), compact_term.as_u64(), &state)?;

        // Drop the covered prefix in memory, then mirror the result on disk.
        self.log.truncate_before(compact_index.next());
        let remaining: Vec<LogRecord> = self
            .log
            .entries_from(compact_index.next(), usize::MAX)
            .iter()
            .map(|e| LogRecord {
                term: e.term.as_u64(),
                index: e.index.as_u64(),
                payload: e.payload.clone(),
            })
            .collect();
        if let Some(store) = self.store.as_mut() {
            store.rewrite_log(compact_index.as_u64(), compact_term.as_u64(), &remaining)?;
        }

        tracing::info!(
            last_index = %compact_index,
            last_term = %compact_term,
            state_len = state.len(),
            "snapshot created"
        );
        Ok(())
    }

    /// Compact when the log has outgrown the configured threshold.
    pub(crate) fn maybe_compact(&mut self) -> Result<()> {
        if self.store.is_none() || self.state_machine.is_none() {
            return Ok(());
        }
        if self.log.count() < self.config.auto_compaction_threshold {
            return Ok(());
        }
        if self.last_applied == LogIndex::ZERO || self.last_applied <= self.log.base_index() {
            return Ok(());
        }
        self.create_snapshot()
    }

    /// Ship our snapshot to a peer whose next entry has been compacted away.
    pub(crate) fn send_snapshot(&mut self, peer: NodeId) -> Result<()> {
        let (last_index, last_term, data) = match self.store.as_ref() {
            Some(store) if store.snapshot_exists() => {
                let snap = store.read_snapshot()?;
                (
                    LogIndex(snap.meta.last_index),
                    snap.meta.last_term,
                    snap.data,
                )
            }
            _ => {
                // No snapshot on disk (memory-only node): serialize live state
                // at the log base, which is what the peer is missing.
                let Some(sm) = self.state_machine.as_mut() else {
                    return Ok(());
                };
                let data = sm.snapshot().map_err(|e| RaftError::SnapshotFailed {
                    reason: e.to_string(),
                })?;
                (self.log.base_index(), self.log.base_term().as_u64(), data)
            }
        };

        tracing::debug!(%peer, last_index = %last_index, "sending snapshot");
        let msg = Message::InstallSnapshot(InstallSnapshot {
            term: self.current_term,
            leader_id: self.id,
            last_index,
            last_term: crate::types::Term(last_term),
            offset: 0,
            done: true,
            data,
        });
        self.send_to(peer, &msg);
        Ok(())
    }

    pub(crate) fn handle_install_snapshot(
        &mut self,
        from: NodeId,
        req: InstallSnapshot,
    ) -> Result<()> {
        if req.term > self.current_term {
            self.step_down(req.term)?;
        }
        if req.term < self.current_term {
            self.send_to(
                from,
                &Message::InstallSnapshotResponse(InstallSnapshotResponse {
                    term: self.current_term,
                    success: false,
                }),
            );
            return Ok(());
        }

        self.timers.reset_election();
        self.leader_id = Some(req.leader_id);
        if self.role == Role::Candidate || self.role == Role::PreCandidate {
            self.role = Role::Follower;
            self.votes.clear();
        }

        // A duplicate or stale snapshot has nothing for us; ack and move on.
        if req.last_index <= self.commit_index {
            self.send_to(
                from,
                &Message::InstallSnapshotResponse(InstallSnapshotResponse {
                    term: self.current_term,
                    success: true,
                }),
            );
            return Ok(());
        }

        tracing::info!(
            last_index = %req.last_index,
            last_term = %req.last_term,
            "installing snapshot"
        );

        // Persist first: the log prefix is unrecoverable once discarded.
        if let Some(store) = self.store.as_mut() {
            store.write_snapshot(req.last_index.as_u64(), req.last_term.as_u64(), &req.data)?;
            store.rewrite_log(req.last_index.as_u64(), req.last_term.as_u64(), &[])?;
        }

        self.log.reset_to(req.last_index, req.last_term);
        self.commit_index = self.commit_index.max(req.last_index);
        self.last_applied = self.last_applied.max(req.last_index);

        if let Some(sm) = self.state_machine.as_mut() {
            sm.restore(&req.data);
        }

        self.send_to(
            from,
            &Message::InstallSnapshotResponse(InstallSnapshotResponse {
                term: self.current_term,
                success: true,
            }),
        );
        Ok(())
    }

    pub(crate) fn handle_install_snapshot_response(
        &mut self,
        from: NodeId,
        resp: InstallSnapshotResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.step_down(resp.term);
        }
        if self.role != Role::Leader || resp.term < self.current_term || !resp.success {
            return Ok(());
        }

        // The peer now holds everything up to our log base; resume normal
        // replication from there.
        let base = self.log.base_index();
        if let Some(leader_state) = self.leader_state.as_mut() {
            let matched = leader_state.match_index.entry(from).or_default();
            if base > *matched {
                *matched = base;
            }
            leader_state.next_index.insert(from, base.next());
        }
        self.record_read_acks(from);
        self.check_transfer_progress();
        self.advance_commit_index()?;
        self.replicate_to(from)
    }
}
