//! Single-step cluster membership changes.
//!
//! Exactly one change (add or remove of one node) may be in flight. The
//! change travels the log as a `Config` entry and takes effect when applied,
//! on every replica. Quorum during the transition: a pending add counts as a
//! voter immediately; a pending remove keeps counting until the entry is
//! applied.

use crate::error::{RaftError, Result};
use crate::raft::Raft;
use crate::types::{Entry, EntryKind, LogIndex, NodeId, Role};
use bytes::{BufMut, Bytes, BytesMut};

const OP_ADD: u8 = b'A';
const OP_REMOVE: u8 = b'R';
const CHANGE_LEN: usize = 5;

/// Which way a config entry mutates the voting set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOp {
    Add,
    Remove,
}

/// A change that has been appended but not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub op: ConfigOp,
    pub node: NodeId,
}

/// The voting set plus at most one pending change.
#[derive(Debug, Clone)]
pub(crate) struct ClusterConfig {
    voters: Vec<NodeId>,
    pending: Option<PendingChange>,
}

impl ClusterConfig {
    /// Bootstrap config: voters numbered `0..num_nodes`.
    pub fn bootstrap(num_nodes: u32) -> Self {
        Self {
            voters: (0..num_nodes).map(NodeId).collect(),
            pending: None,
        }
    }

    pub fn voters(&self) -> &[NodeId] {
        &self.voters
    }

    pub fn pending(&self) -> Option<PendingChange> {
        self.pending
    }

    pub fn set_pending(&mut self, change: PendingChange) {
        self.pending = Some(change);
    }

    /// A node's vote counts if it is a standing voter or the pending add.
    pub fn is_voter(&self, id: NodeId) -> bool {
        if self.voters.contains(&id) {
            return true;
        }
        matches!(
            self.pending,
            Some(PendingChange {
                op: ConfigOp::Add,
                node
            }) if node == id
        )
    }

    /// Size of the voting set for quorum purposes.
    pub fn voting_size(&self) -> usize {
        let mut size = self.voters.len();
        if matches!(self.pending, Some(PendingChange { op: ConfigOp::Add, .. })) {
            size += 1;
        }
        size
    }

    /// Strict majority of the voting set.
    pub fn quorum(&self) -> usize {
        self.voting_size() / 2 + 1
    }

    /// Replication and election targets: every voter (pending add included)
    /// except `me`.
    pub fn peers(&self, me: NodeId) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self.voters.iter().copied().filter(|&v| v != me).collect();
        if let Some(PendingChange {
            op: ConfigOp::Add,
            node,
        }) = self.pending
        {
            if node != me && !peers.contains(&node) {
                peers.push(node);
            }
        }
        peers
    }

    /// Apply a change: mutate the voters and clear the pending slot.
    pub fn apply(&mut self, op: ConfigOp, node: NodeId) {
        match op {
            ConfigOp::Add => {
                if !self.voters.contains(&node) {
                    self.voters.push(node);
                }
            }
            ConfigOp::Remove => {
                self.voters.retain(|&v| v != node);
            }
        }
        self.pending = None;
    }
}

/// Encode a change as a config-entry payload: op byte + node id.
pub(crate) fn encode_change(op: ConfigOp, node: NodeId) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHANGE_LEN);
    buf.put_u8(match op {
        ConfigOp::Add => OP_ADD,
        ConfigOp::Remove => OP_REMOVE,
    });
    buf.put_u32_le(node.as_u32());
    buf.freeze()
}

pub(crate) fn decode_change(payload: &[u8]) -> Result<(ConfigOp, NodeId)> {
    if payload.len() < CHANGE_LEN {
        return Err(RaftError::InvalidMessage {
            reason: "config change payload truncated",
        });
    }
    let op = match payload[0] {
        OP_ADD => ConfigOp::Add,
        OP_REMOVE => ConfigOp::Remove,
        _ => {
            return Err(RaftError::InvalidMessage {
                reason: "unknown config change op",
            })
        }
    };
    let node = NodeId(u32::from_le_bytes([
        payload[1], payload[2], payload[3], payload[4],
    ]));
    Ok((op, node))
}

impl Raft {
    /// Propose adding a voter. Leader-only; rejected while another change is
    /// pending or if the node already votes.
    pub fn add_node(&mut self, node: NodeId) -> Result<LogIndex> {
        if self.cluster.is_voter(node) {
            return Err(RaftError::invalid_arg(format!("{node} is already a member")));
        }
        self.propose_config_change(ConfigOp::Add, node)
    }

    /// Propose removing a voter. A leader removing itself should transfer
    /// leadership first; it steps down once the entry applies.
    pub fn remove_node(&mut self, node: NodeId) -> Result<LogIndex> {
        if !self.cluster.voters().contains(&node) {
            return Err(RaftError::invalid_arg(format!("{node} is not a member")));
        }
        self.propose_config_change(ConfigOp::Remove, node)
    }

    fn propose_config_change(&mut self, op: ConfigOp, node: NodeId) -> Result<LogIndex> {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                leader: self.leader_id,
            });
        }
        if self.transfer.is_some() {
            return Err(RaftError::NotLeader { leader: None });
        }
        if self.cluster.pending().is_some() {
            return Err(RaftError::invalid_arg(
                "a membership change is already in progress",
            ));
        }

        let payload = encode_change(op, node);
        let index = self.append_and_persist(EntryKind::Config, payload)?;
        self.cluster.set_pending(PendingChange { op, node });
        tracing::info!(%node, ?op, %index, "membership change proposed");

        // A pending add becomes a replication target immediately.
        if let Some(leader_state) = self.leader_state.as_mut() {
            if op == ConfigOp::Add {
                leader_state.ensure_peer(node, self.log.last_index());
            }
        }

        self.replicate_all();
        self.advance_commit_index()?;
        Ok(index)
    }

    /// Apply a committed config entry (any role).
    pub(crate) fn apply_config_change(&mut self, entry: &Entry) {
        let (op, node) = match decode_change(&entry.payload) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(index = %entry.index, error = %e, "undecodable config entry");
                return;
            }
        };

        self.cluster.apply(op, node);
        tracing::info!(%node, ?op, voters = self.cluster.voters().len(), "membership change applied");

        if let Some(leader_state) = self.leader_state.as_mut() {
            match op {
                ConfigOp::Add => leader_state.ensure_peer(node, self.log.last_index()),
                ConfigOp::Remove => leader_state.forget_peer(node),
            }
        }

        // A leader that just removed itself hands the cluster over.
        if op == ConfigOp::Remove && node == self.id && self.role == Role::Leader {
            tracing::info!("removed self from cluster, stepping down");
            self.demote_to_follower();
        }
    }
}
