//! Log replication and commitment.
//!
//! The leader tracks `next_index`/`match_index` per peer and ships batches of
//! at most `max_entries_per_append`. Heartbeats are the same AppendEntries
//! with zero entries and `prev = next_index - 1`; one receiver path handles
//! both, so the consistency check and the commit-index update rule are
//! applied uniformly.
//!
//! Commit rule: an index commits once a strict majority of the voting set
//! (leader included) has it AND its entry is from the current term. Earlier
//! terms commit only transitively under a current-term entry.

use crate::error::Result;
use crate::raft::Raft;
use crate::rpc::{AppendEntries, AppendEntriesResponse, Message};
use crate::types::{Entry, EntryKind, LogIndex, NodeId, Role, Term};
use bytes::Bytes;
use std::collections::HashMap;

/// Per-peer replication progress; valid only while Leader.
#[derive(Debug)]
pub(crate) struct LeaderState {
    /// Next log index to send each peer. Initialized to `last_index + 1`.
    pub next_index: HashMap<NodeId, LogIndex>,
    /// Highest index known replicated on each peer. Initialized to 0.
    pub match_index: HashMap<NodeId, LogIndex>,
}

impl LeaderState {
    pub fn new(peers: &[NodeId], last_index: LogIndex) -> Self {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for &peer in peers {
            next_index.insert(peer, last_index.next());
            match_index.insert(peer, LogIndex::ZERO);
        }
        Self {
            next_index,
            match_index,
        }
    }

    /// Make sure a (newly added) peer is tracked.
    pub fn ensure_peer(&mut self, peer: NodeId, last_index: LogIndex) {
        self.next_index.entry(peer).or_insert(last_index.next());
        self.match_index.entry(peer).or_insert(LogIndex::ZERO);
    }

    pub fn forget_peer(&mut self, peer: NodeId) {
        self.next_index.remove(&peer);
        self.match_index.remove(&peer);
    }
}

impl Raft {
    /// Send AppendEntries (or a heartbeat) to every peer.
    pub(crate) fn replicate_all(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        for peer in self.cluster.peers(self.id) {
            if let Err(e) = self.replicate_to(peer) {
                tracing::warn!(peer = %peer, error = %e, "replication send failed");
            }
        }
    }

    /// Send the next batch (possibly empty) to one peer, or a snapshot when
    /// its next entry has been compacted away.
    pub(crate) fn replicate_to(&mut self, peer: NodeId) -> Result<()> {
        let Some(leader_state) = self.leader_state.as_ref() else {
            return Ok(());
        };
        let next = leader_state
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(self.log.last_index().next());

        if next <= self.log.base_index() && self.log.base_index() > LogIndex::ZERO {
            return self.send_snapshot(peer);
        }

        let prev_log_index = next.prev();
        let prev_log_term = self.log.term_at(prev_log_index);
        let entries: Vec<Entry> = self
            .log
            .entries_from(next, self.config.max_entries_per_append)
            .to_vec();

        let msg = Message::AppendEntries(AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            leader_commit: self.commit_index,
            entries,
        });
        self.send_to(peer, &msg);
        Ok(())
    }

    pub(crate) fn handle_append_entries(&mut self, from: NodeId, req: AppendEntries) -> Result<()> {
        if req.term > self.current_term {
            self.step_down(req.term)?;
        }
        if req.term < self.current_term {
            self.send_to(
                from,
                &Message::AppendEntriesResponse(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: LogIndex::ZERO,
                }),
            );
            return Ok(());
        }

        // Valid traffic from the current leader.
        self.timers.reset_election();
        self.leader_id = Some(req.leader_id);
        if self.role == Role::Candidate || self.role == Role::PreCandidate {
            self.role = Role::Follower;
            self.votes.clear();
        }

        // Consistency check: our entry at prev must match the leader's term.
        if req.prev_log_index > LogIndex::ZERO
            && self.log.term_at(req.prev_log_index) != req.prev_log_term
        {
            tracing::debug!(
                prev = %req.prev_log_index,
                "append-entries consistency check failed"
            );
            self.send_to(
                from,
                &Message::AppendEntriesResponse(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: self.log.last_index(),
                }),
            );
            return Ok(());
        }

        // Conflict resolution, then append anything genuinely new.
        // Re-delivery of entries already present is a no-op.
        let entries_len = req.entries.len() as u64;
        for entry in req.entries {
            if entry.index <= self.log.base_index() {
                continue; // already folded into a snapshot
            }
            let existing = self.log.term_at(entry.index);
            if existing != Term::ZERO && existing != entry.term {
                self.log.truncate_after(entry.index.prev());
                if let Some(store) = self.store.as_mut() {
                    store.truncate_after(entry.index.prev().as_u64())?;
                }
            }
            if entry.index > self.log.last_index() {
                if let Some(store) = self.store.as_mut() {
                    store.append_entry(entry.term.as_u64(), entry.index.as_u64(), &entry.payload)?;
                }
                self.log.append_entry(entry);
            }
        }

        // Commit update, one rule for heartbeats and log appends alike.
        if req.leader_commit > self.commit_index {
            let last_new = LogIndex(req.prev_log_index.as_u64() + entries_len);
            let new_commit = req
                .leader_commit
                .min(last_new)
                .min(self.log.last_index());
            if new_commit > self.commit_index {
                self.commit_index = new_commit;
                self.apply_committed()?;
            }
        }

        self.send_to(
            from,
            &Message::AppendEntriesResponse(AppendEntriesResponse {
                term: self.current_term,
                success: true,
                match_index: self.log.last_index(),
            }),
        );
        Ok(())
    }

    pub(crate) fn handle_append_entries_response(
        &mut self,
        from: NodeId,
        resp: AppendEntriesResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.step_down(resp.term);
        }
        if self.role != Role::Leader || resp.term < self.current_term {
            return Ok(()); // stale
        }
        let Some(leader_state) = self.leader_state.as_mut() else {
            return Ok(());
        };

        if resp.success {
            let match_entry = leader_state.match_index.entry(from).or_default();
            // Responses may arrive reordered; match_index only moves forward.
            if resp.match_index > *match_entry {
                *match_entry = resp.match_index;
                leader_state.next_index.insert(from, resp.match_index.next());
            }
            let next = leader_state
                .next_index
                .get(&from)
                .copied()
                .unwrap_or(LogIndex::ZERO);

            self.record_read_acks(from);
            self.check_transfer_progress();
            self.advance_commit_index()?;

            // Keep pushing while the peer is behind.
            if next <= self.log.last_index() {
                self.replicate_to(from)?;
            }
        } else {
            // Prefix mismatch: back up (bounded by the follower's hint) and
            // retry until the logs reconverge.
            let next = leader_state
                .next_index
                .get(&from)
                .copied()
                .unwrap_or(LogIndex(1));
            let backed_up = next.prev().min(resp.match_index.next()).max(LogIndex(1));
            leader_state.next_index.insert(from, backed_up);
            self.replicate_to(from)?;
        }
        Ok(())
    }

    /// Advance `commit_index` to the highest current-term index on a
    /// majority, then pump applies.
    pub(crate) fn advance_commit_index(&mut self) -> Result<()> {
        if self.role != Role::Leader {
            return Ok(());
        }
        let Some(leader_state) = self.leader_state.as_ref() else {
            return Ok(());
        };

        let quorum = self.cluster.quorum();
        let mut new_commit = self.commit_index;

        let mut n = self.commit_index.next();
        while n <= self.log.last_index() {
            let mut count = usize::from(self.cluster.is_voter(self.id));
            for (&peer, &matched) in &leader_state.match_index {
                if matched >= n && self.cluster.is_voter(peer) {
                    count += 1;
                }
            }
            if count >= quorum && self.log.term_at(n) == self.current_term {
                new_commit = n;
            }
            n = n.next();
        }

        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed()?;
        }
        Ok(())
    }

    /// Apply everything committed but not yet applied, in index order.
    pub(crate) fn apply_committed(&mut self) -> Result<()> {
        while self.last_applied < self.commit_index {
            let next = self.last_applied.next();
            let Some(entry) = self.log.get(next).cloned() else {
                break;
            };
            self.last_applied = next;
            self.dispatch_apply(&entry);
        }
        self.maybe_compact()
    }

    /// Hand one committed entry to its consumer.
    pub(crate) fn dispatch_apply(&mut self, entry: &Entry) {
        match entry.kind {
            EntryKind::Command => {
                if let Some(sm) = self.state_machine.as_mut() {
                    sm.apply(entry);
                }
            }
            EntryKind::Config => self.apply_config_change(entry),
            EntryKind::Noop => {}
        }
    }

    /// Append to the in-memory log and persist; rolls the in-memory append
    /// back if the disk write fails so no unpersisted entry survives.
    pub(crate) fn append_and_persist(&mut self, kind: EntryKind, payload: Bytes) -> Result<LogIndex> {
        let index = self.log.append(self.current_term, kind, payload.clone());
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.append_entry(self.current_term.as_u64(), index.as_u64(), &payload)
            {
                self.log.truncate_after(index.prev());
                return Err(e.into());
            }
        }
        Ok(index)
    }
}
