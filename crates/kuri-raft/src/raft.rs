//! The Raft node: one passive object driven by ticks, received frames, and
//! local client calls.
//!
//! Single-writer discipline: every mutating entry point takes `&mut self`,
//! there are no internal threads, and disk I/O happens inline on the calling
//! thread. Outbound effects are transport sends, state-machine applies, and
//! store writes.

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::RaftLog;
use crate::membership::ClusterConfig;
use crate::read_index::ReadRequest;
use crate::replication::LeaderState;
use crate::rpc::Message;
use crate::timer::Timers;
use crate::transfer::TransferState;
use crate::transport::{StateMachine, Transport};
use crate::types::{EntryKind, LogIndex, NodeId, Role, Term};
use bytes::Bytes;
use kuri_store::Store;
use std::collections::{HashSet, VecDeque};

/// A single Raft replica.
pub struct Raft {
    pub(crate) id: NodeId,
    pub(crate) config: RaftConfig,

    pub(crate) role: Role,
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) leader_id: Option<NodeId>,

    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,

    pub(crate) log: RaftLog,
    pub(crate) cluster: ClusterConfig,
    pub(crate) leader_state: Option<LeaderState>,
    /// Vote (or pre-vote) tally for the round in flight, self included.
    pub(crate) votes: HashSet<NodeId>,
    pub(crate) timers: Timers,
    pub(crate) running: bool,

    pub(crate) store: Option<Store>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) state_machine: Option<Box<dyn StateMachine>>,

    pub(crate) pending_reads: VecDeque<ReadRequest>,
    pub(crate) transfer: Option<TransferState>,
}

impl Raft {
    /// Create a node. Opens the store and recovers durable state when
    /// `config.data_dir` is set; a corrupt store refuses to start.
    pub fn new(
        config: RaftConfig,
        transport: Option<Box<dyn Transport>>,
        state_machine: Option<Box<dyn StateMachine>>,
    ) -> Result<Raft> {
        config
            .validate()
            .map_err(|reason| RaftError::Config { reason })?;

        let store = match &config.data_dir {
            Some(dir) => Some(Store::open(dir, config.sync_writes)?),
            None => None,
        };
        let timers = Timers::new(
            config.election_timeout_ms,
            config.heartbeat_interval_ms,
            config.timer_seed,
        );
        let cluster = ClusterConfig::bootstrap(config.num_nodes);

        let mut node = Raft {
            id: config.node_id,
            role: Role::Follower,
            current_term: Term::ZERO,
            voted_for: None,
            leader_id: None,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            log: RaftLog::new(),
            cluster,
            leader_state: None,
            votes: HashSet::new(),
            timers,
            running: false,
            store,
            transport,
            state_machine,
            pending_reads: VecDeque::new(),
            transfer: None,
            config,
        };

        if node.store.is_some() {
            node.recover()?;
        }
        Ok(node)
    }

    /// Start serving. A single-voter cluster elects itself immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.running = true;
        if self.cluster.voting_size() == 1 && self.cluster.is_voter(self.id) {
            return self.become_leader();
        }
        Ok(())
    }

    /// Stop serving; all further mutating calls return [`RaftError::Stopped`].
    pub fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    /// Advance virtual time. Drives election timeouts, leader heartbeats,
    /// and transfer patience.
    pub fn tick(&mut self, elapsed_ms: u64) -> Result<()> {
        if !self.running {
            return Err(RaftError::Stopped);
        }

        if self.role == Role::Leader {
            if self.timers.advance_heartbeat(elapsed_ms) {
                self.replicate_all();
            }
            self.tick_transfer(elapsed_ms);
            return Ok(());
        }

        if self.timers.advance_election(elapsed_ms) {
            match self.role {
                Role::PreCandidate => {
                    // The canvass went nowhere; try again after a fresh wait.
                    self.role = Role::Follower;
                    self.votes.clear();
                    self.timers.reset_election();
                }
                Role::Follower if self.config.prevote_enabled => self.start_pre_vote()?,
                _ => self.start_election()?,
            }
        }
        Ok(())
    }

    /// Decode one frame from `from` and dispatch it. Responses, if any, go
    /// out through the transport.
    pub fn receive(&mut self, from: NodeId, data: &[u8]) -> Result<()> {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        match Message::decode(data)? {
            Message::RequestVote(m) => self.handle_request_vote(from, m),
            Message::RequestVoteResponse(m) => self.handle_request_vote_response(from, m),
            Message::AppendEntries(m) => self.handle_append_entries(from, m),
            Message::AppendEntriesResponse(m) => self.handle_append_entries_response(from, m),
            Message::InstallSnapshot(m) => self.handle_install_snapshot(from, m),
            Message::InstallSnapshotResponse(m) => self.handle_install_snapshot_response(from, m),
            Message::PreVote(m) => self.handle_pre_vote(from, m),
            Message::PreVoteResponse(m) => self.handle_pre_vote_response(from, m),
            Message::TimeoutNow(m) => self.handle_timeout_now(from, m),
        }
    }

    /// Propose a command. Leader-only; returns the assigned log index. On a
    /// single-voter cluster the entry is committed and applied before this
    /// returns.
    pub fn propose(&mut self, command: Bytes) -> Result<LogIndex> {
        self.check_proposable()?;
        let index = self.append_and_persist(EntryKind::Command, command)?;
        self.replicate_all();
        self.advance_commit_index()?;
        Ok(index)
    }

    /// Propose several commands as one batch. On a mid-batch persistence
    /// failure the log is rolled back to before the batch and the error
    /// surfaces; no partial batch survives.
    pub fn propose_batch(&mut self, commands: &[Bytes]) -> Result<LogIndex> {
        self.check_proposable()?;
        if commands.is_empty() {
            return Err(RaftError::invalid_arg("empty batch"));
        }

        let first_index = self.log.last_index().next();
        for command in commands {
            if let Err(e) = self.append_and_persist(EntryKind::Command, command.clone()) {
                self.log.truncate_after(first_index.prev());
                if let Some(store) = self.store.as_mut() {
                    // Best effort: the append that failed may itself have
                    // left nothing behind.
                    let _ = store.truncate_after(first_index.prev().as_u64());
                }
                return Err(e);
            }
        }

        self.replicate_all();
        self.advance_commit_index()?;
        Ok(first_index)
    }

    /// Apply up to `max` committed entries; returns how many ran.
    pub fn apply_batch(&mut self, max: usize) -> Result<usize> {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        let mut applied = 0;
        while applied < max && self.last_applied < self.commit_index {
            let next = self.last_applied.next();
            let Some(entry) = self.log.get(next).cloned() else {
                break;
            };
            self.last_applied = next;
            self.dispatch_apply(&entry);
            applied += 1;
        }
        if applied > 0 {
            self.maybe_compact()?;
        }
        Ok(applied)
    }

    /// Committed entries not yet applied.
    pub fn pending_apply_count(&self) -> u64 {
        self.commit_index
            .as_u64()
            .saturating_sub(self.last_applied.as_u64())
    }

    fn check_proposable(&self) -> Result<()> {
        if !self.running {
            return Err(RaftError::Stopped);
        }
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                leader: self.leader_id,
            });
        }
        if self.transfer.is_some() {
            // Draining for a handover; the new leader will take proposals.
            return Err(RaftError::NotLeader { leader: None });
        }
        Ok(())
    }

    // --- getters ---

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// The leader as this node knows it (itself when leading).
    pub fn leader(&self) -> Option<NodeId> {
        if self.role == Role::Leader {
            Some(self.id)
        } else {
            self.leader_id
        }
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    /// The standing voting set (a pending add is not listed until applied).
    pub fn voters(&self) -> Vec<NodeId> {
        self.cluster.voters().to_vec()
    }

    /// Read-only view of the log.
    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    // --- internal plumbing ---

    /// Persist `(current_term, voted_for)`; must run before any reply that
    /// discloses either.
    pub(crate) fn persist_hard_state(&mut self) -> Result<()> {
        if let Some(store) = self.store.as_ref() {
            store.save_state(
                self.current_term.as_u64(),
                self.voted_for.map(NodeId::as_u32),
            )?;
        }
        Ok(())
    }

    pub(crate) fn send_to(&mut self, peer: NodeId, msg: &Message) {
        if let Some(transport) = self.transport.as_mut() {
            transport.send(peer, msg.encode());
        }
    }

    pub(crate) fn broadcast(&mut self, msg: &Message) {
        let frame = msg.encode();
        if let Some(transport) = self.transport.as_mut() {
            for peer in self.cluster.peers(self.id) {
                transport.send(peer, frame.clone());
            }
        }
    }
}
