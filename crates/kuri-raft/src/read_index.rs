//! ReadIndex: linearizable reads without log writes.
//!
//! The leader pins a read to its current commit index, then proves it is
//! still the leader by collecting a majority of heartbeat acknowledgements.
//! Once confirmed, the callback fires with the pinned index; the caller may
//! read its state machine as soon as `last_applied` reaches it.
//!
//! Pending reads are an explicit FIFO of request objects driven by incoming
//! acks; losing leadership cancels them all with `NotLeader`.

use crate::error::{RaftError, Result};
use crate::raft::Raft;
use crate::types::{LogIndex, NodeId, Role};
use std::collections::HashSet;

/// Completion callback: `Ok(read_index)` once leadership is confirmed,
/// `Err(NotLeader)` if it was lost first.
pub type ReadCallback = Box<dyn FnOnce(Result<LogIndex>) + Send>;

/// One in-flight read, waiting on a majority of acks.
pub(crate) struct ReadRequest {
    pub index: LogIndex,
    pub acked: HashSet<NodeId>,
    pub callback: ReadCallback,
}

impl Raft {
    /// Start a linearizable read.
    ///
    /// On a single-voter cluster the commit index is trivially confirmed and
    /// the callback fires before this returns. Otherwise the read is queued
    /// and a heartbeat round is pulsed to collect acks.
    pub fn read_index<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<LogIndex>) + Send + 'static,
    {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                leader: self.leader_id,
            });
        }

        if self.cluster.voting_size() == 1 {
            callback(Ok(self.commit_index));
            return Ok(());
        }

        self.pending_reads.push_back(ReadRequest {
            index: self.commit_index,
            acked: HashSet::new(),
            callback: Box::new(callback),
        });
        self.replicate_all();
        Ok(())
    }

    /// Count a successful current-term AppendEntries response toward every
    /// pending read; complete the ones that reach a majority.
    pub(crate) fn record_read_acks(&mut self, from: NodeId) {
        if self.role != Role::Leader || self.pending_reads.is_empty() {
            return;
        }
        if !self.cluster.is_voter(from) {
            return;
        }

        let quorum = self.cluster.quorum();
        let mut i = 0;
        while i < self.pending_reads.len() {
            let request = &mut self.pending_reads[i];
            request.acked.insert(from);
            // Leader counts itself, hence + 1.
            if request.acked.len() + 1 >= quorum {
                let request = self.pending_reads.remove(i).expect("index in bounds");
                (request.callback)(Ok(request.index));
            } else {
                i += 1;
            }
        }
    }

    /// Fail every pending read; invoked on any loss of leadership.
    pub(crate) fn cancel_pending_reads(&mut self) {
        let leader = self.leader_id;
        for request in self.pending_reads.drain(..) {
            (request.callback)(Err(RaftError::NotLeader { leader }));
        }
    }

    /// Number of reads awaiting confirmation.
    pub fn pending_read_count(&self) -> usize {
        self.pending_reads.len()
    }
}
