//! Graceful leadership transfer.
//!
//! The leader marks a target, keeps replicating until the target's log is
//! complete, then sends TimeoutNow so the target elects itself without the
//! randomized wait. The old leader steps down when it sees the higher term.
//! A transfer that makes no progress within one election timeout is aborted
//! and normal operation resumes; proposals are refused while one is pending.

use crate::error::{RaftError, Result};
use crate::raft::Raft;
use crate::rpc::{Message, TimeoutNow};
use crate::types::{NodeId, Role};

/// State of an in-flight transfer.
#[derive(Debug)]
pub(crate) struct TransferState {
    pub target: NodeId,
    pub elapsed_ms: u64,
    pub timeout_now_sent: bool,
}

impl Raft {
    /// Begin handing leadership to `target`, or to the most caught-up peer
    /// when `None`.
    pub fn transfer_leadership(&mut self, target: Option<NodeId>) -> Result<()> {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                leader: self.leader_id,
            });
        }

        let target = match target {
            Some(t) => {
                if t == self.id {
                    return Err(RaftError::invalid_arg("cannot transfer to self"));
                }
                if !self.cluster.is_voter(t) {
                    return Err(RaftError::invalid_arg(format!("{t} is not a voter")));
                }
                t
            }
            None => self
                .most_caught_up_peer()
                .ok_or_else(|| RaftError::invalid_arg("no peer to transfer to"))?,
        };

        tracing::info!(%target, "leadership transfer started");
        self.transfer = Some(TransferState {
            target,
            elapsed_ms: 0,
            timeout_now_sent: false,
        });

        // The target may already be caught up.
        self.check_transfer_progress();
        Ok(())
    }

    fn most_caught_up_peer(&self) -> Option<NodeId> {
        let leader_state = self.leader_state.as_ref()?;
        leader_state
            .match_index
            .iter()
            .map(|(&peer, &matched)| (peer, matched))
            .filter(|&(peer, _)| peer != self.id && self.cluster.is_voter(peer))
            .max_by_key(|&(_, matched)| matched)
            .map(|(peer, _)| peer)
    }

    /// Fire TimeoutNow once the target holds the whole log.
    pub(crate) fn check_transfer_progress(&mut self) {
        let Some(transfer) = self.transfer.as_ref() else {
            return;
        };
        if self.role != Role::Leader {
            self.abort_transfer();
            return;
        }
        if transfer.timeout_now_sent {
            return;
        }

        let target = transfer.target;
        let caught_up = self
            .leader_state
            .as_ref()
            .and_then(|ls| ls.match_index.get(&target).copied())
            .map(|matched| matched >= self.log.last_index())
            .unwrap_or(false);

        if caught_up {
            tracing::debug!(%target, "transfer target caught up, sending timeout-now");
            let msg = Message::TimeoutNow(TimeoutNow {
                term: self.current_term,
                leader_id: self.id,
            });
            self.send_to(target, &msg);
            if let Some(transfer) = self.transfer.as_mut() {
                transfer.timeout_now_sent = true;
            }
        }
    }

    /// Give up on a transfer after one election timeout without completion.
    pub(crate) fn tick_transfer(&mut self, elapsed_ms: u64) {
        let deadline = self.timers.election_timeout_ms();
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.elapsed_ms += elapsed_ms;
            if transfer.elapsed_ms >= deadline {
                tracing::info!(target = %transfer.target, "leadership transfer timed out");
                self.abort_transfer();
            }
        }
    }

    pub(crate) fn abort_transfer(&mut self) {
        self.transfer = None;
    }

    /// True while a transfer is pending; proposals are refused meanwhile.
    pub fn transfer_in_progress(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn transfer_target(&self) -> Option<NodeId> {
        self.transfer.as_ref().map(|t| t.target)
    }
}
