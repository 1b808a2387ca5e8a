//! Leader election: role transitions, votes, PreVote, TimeoutNow.
//!
//! Role transitions:
//! - election timeout moves a Follower to Candidate (or PreCandidate when
//!   PreVote is enabled), increments the term, votes for self
//! - a PreCandidate canvasses with `term + 1` without touching its term; a
//!   majority of pre-votes starts the real election, anything else drops it
//!   back to Follower
//! - a Candidate with a majority of votes becomes Leader
//! - any role observing a higher term steps down to Follower
//!
//! Persistence rule: `current_term` and `voted_for` hit disk before any reply
//! that discloses them.

use crate::error::Result;
use crate::raft::Raft;
use crate::replication::LeaderState;
use crate::rpc::{
    Message, PreVote, PreVoteResponse, RequestVote, RequestVoteResponse, TimeoutNow,
};
use crate::types::{LogIndex, NodeId, Role, Term};

impl Raft {
    /// Adopt `new_term` and fall back to Follower.
    ///
    /// Invoked whenever any RPC carries a term above ours. Clears the vote,
    /// forgets the leader, cancels pending reads and any transfer.
    pub(crate) fn step_down(&mut self, new_term: Term) -> Result<()> {
        if self.role == Role::Leader {
            tracing::warn!(term = %self.current_term, new_term = %new_term, "leader stepping down");
        } else {
            tracing::debug!(term = %self.current_term, new_term = %new_term, "stepping down");
        }

        self.role = Role::Follower;
        self.current_term = new_term;
        self.voted_for = None;
        self.leader_id = None;
        self.leader_state = None;
        self.votes.clear();
        self.persist_hard_state()?;

        self.cancel_pending_reads();
        self.abort_transfer();
        self.timers.reset_election();
        Ok(())
    }

    /// Leave leadership without a term change (self-removal from the
    /// cluster). The node keeps running as a non-voting bystander.
    pub(crate) fn demote_to_follower(&mut self) {
        self.role = Role::Follower;
        self.leader_id = None;
        self.leader_state = None;
        self.votes.clear();
        self.cancel_pending_reads();
        self.abort_transfer();
        self.timers.reset_election();
    }

    /// Begin a PreVote round: canvass at `term + 1` without bumping the term.
    pub(crate) fn start_pre_vote(&mut self) -> Result<()> {
        self.role = Role::PreCandidate;
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.id);
        self.timers.reset_election();

        if self.votes.len() >= self.cluster.quorum() {
            return self.start_election();
        }

        tracing::debug!(term = %self.current_term, "starting pre-vote round");
        let msg = Message::PreVote(PreVote {
            term: self.current_term.next(),
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        });
        self.broadcast(&msg);
        Ok(())
    }

    /// Begin a real election: new term, vote for self, ask everyone else.
    pub(crate) fn start_election(&mut self) -> Result<()> {
        self.role = Role::Candidate;
        self.current_term = self.current_term.next();
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.id);
        self.persist_hard_state()?;
        self.timers.reset_election();

        tracing::debug!(term = %self.current_term, "starting election");

        if self.votes.len() >= self.cluster.quorum() {
            return self.become_leader();
        }

        let msg = Message::RequestVote(RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        });
        self.broadcast(&msg);
        Ok(())
    }

    /// Election won: set up replication state and pulse heartbeats.
    pub(crate) fn become_leader(&mut self) -> Result<()> {
        tracing::info!(term = %self.current_term, "became leader");

        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.votes.clear();
        self.leader_state = Some(LeaderState::new(
            &self.cluster.peers(self.id),
            self.log.last_index(),
        ));
        self.timers.reset_heartbeat();

        // A single-voter cluster has its majority standing right here.
        if self.cluster.voting_size() == 1 {
            self.commit_index = self.log.last_index();
            self.apply_committed()?;
        }

        self.replicate_all();
        Ok(())
    }

    /// Candidate's log is at least as up-to-date as ours (RequestVote §5.4.1).
    pub(crate) fn log_up_to_date(&self, last_log_term: Term, last_log_index: LogIndex) -> bool {
        let my_last_term = self.log.last_term();
        last_log_term > my_last_term
            || (last_log_term == my_last_term && last_log_index >= self.log.last_index())
    }

    pub(crate) fn handle_request_vote(&mut self, from: NodeId, req: RequestVote) -> Result<()> {
        if req.term > self.current_term {
            self.step_down(req.term)?;
        }

        let mut vote_granted = false;
        if req.term == self.current_term {
            let can_vote = match self.voted_for {
                None => true,
                Some(id) => id == req.candidate_id,
            };
            if can_vote && self.log_up_to_date(req.last_log_term, req.last_log_index) {
                self.voted_for = Some(req.candidate_id);
                self.persist_hard_state()?;
                self.timers.reset_election();
                vote_granted = true;
            }
        }

        self.send_to(
            from,
            &Message::RequestVoteResponse(RequestVoteResponse {
                term: self.current_term,
                vote_granted,
            }),
        );
        Ok(())
    }

    pub(crate) fn handle_request_vote_response(
        &mut self,
        from: NodeId,
        resp: RequestVoteResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.step_down(resp.term);
        }
        if self.role != Role::Candidate || resp.term < self.current_term {
            return Ok(()); // stale or no longer campaigning
        }

        if resp.vote_granted && self.cluster.is_voter(from) {
            self.votes.insert(from);
            if self.votes.len() >= self.cluster.quorum() {
                return self.become_leader();
            }
        }
        Ok(())
    }

    /// PreVote receiver. Never mutates term or vote; a grant only says a
    /// real election at that term could win here.
    pub(crate) fn handle_pre_vote(&mut self, from: NodeId, req: PreVote) -> Result<()> {
        let would_stand = self.leader_id.is_none() || self.timers.election_expired();
        let vote_granted = req.term > self.current_term
            && would_stand
            && self.log_up_to_date(req.last_log_term, req.last_log_index);

        self.send_to(
            from,
            &Message::PreVoteResponse(PreVoteResponse {
                term: self.current_term,
                vote_granted,
            }),
        );
        Ok(())
    }

    pub(crate) fn handle_pre_vote_response(
        &mut self,
        from: NodeId,
        resp: PreVoteResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.step_down(resp.term);
        }
        if self.role != Role::PreCandidate {
            return Ok(());
        }

        if resp.vote_granted {
            if self.cluster.is_voter(from) {
                self.votes.insert(from);
                if self.votes.len() >= self.cluster.quorum() {
                    return self.start_election();
                }
            }
        } else {
            // Someone still hears a leader; stand down until the next timeout.
            self.role = Role::Follower;
            self.votes.clear();
            self.timers.reset_election();
        }
        Ok(())
    }

    /// TimeoutNow: the leader wants us to take over right now, skipping the
    /// randomized wait (and PreVote).
    pub(crate) fn handle_timeout_now(&mut self, _from: NodeId, req: TimeoutNow) -> Result<()> {
        if req.term < self.current_term || self.role == Role::Leader {
            return Ok(());
        }
        if !self.cluster.is_voter(self.id) {
            return Ok(());
        }
        tracing::debug!(term = %self.current_term, leader = %req.leader_id, "timeout-now received");
        self.start_election()
    }
}

#[cfg(test)]
mod tests {
    use crate::rpc::{Message, PreVote, RequestVote, RequestVoteResponse, TimeoutNow};
    use crate::testutil::{drain_frames, test_node};
    use crate::types::{LogIndex, NodeId, Role, Term};

    #[test]
    fn test_follower_timeout_becomes_candidate() {
        let (mut node, _queue) = test_node(0, 3);
        node.start().unwrap();
        assert_eq!(node.role(), Role::Follower);

        node.tick(300).unwrap();

        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.current_term(), Term(1));
        assert_eq!(node.voted_for(), Some(NodeId(0)));
    }

    #[test]
    fn test_candidate_wins_with_majority() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap();

        // RequestVote went to both peers.
        let frames = drain_frames(&queue);
        assert_eq!(frames.len(), 2);

        let grant = Message::RequestVoteResponse(RequestVoteResponse {
            term: Term(1),
            vote_granted: true,
        });
        node.receive(NodeId(1), &grant.encode()).unwrap();

        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.leader(), Some(NodeId(0)));
    }

    #[test]
    fn test_duplicate_votes_do_not_elect() {
        let (mut node, _queue) = test_node(0, 5);
        node.start().unwrap();
        node.tick(300).unwrap();

        let grant = Message::RequestVoteResponse(RequestVoteResponse {
            term: Term(1),
            vote_granted: true,
        });
        // The same voter acking twice is one vote.
        node.receive(NodeId(1), &grant.encode()).unwrap();
        node.receive(NodeId(1), &grant.encode()).unwrap();
        assert_eq!(node.role(), Role::Candidate);

        node.receive(NodeId(2), &grant.encode()).unwrap();
        assert_eq!(node.role(), Role::Leader);
    }

    #[test]
    fn test_step_down_on_higher_term() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap();
        node.receive(
            NodeId(1),
            &Message::RequestVoteResponse(RequestVoteResponse {
                term: Term(1),
                vote_granted: true,
            })
            .encode(),
        )
        .unwrap();
        assert_eq!(node.role(), Role::Leader);
        drain_frames(&queue);

        let req = Message::RequestVote(RequestVote {
            term: Term(5),
            candidate_id: NodeId(2),
            last_log_index: LogIndex::ZERO,
            last_log_term: Term::ZERO,
        });
        node.receive(NodeId(2), &req.encode()).unwrap();

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), Term(5));
    }

    #[test]
    fn test_vote_rejected_for_stale_term() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap(); // now term 1
        drain_frames(&queue);

        let req = Message::RequestVote(RequestVote {
            term: Term::ZERO,
            candidate_id: NodeId(2),
            last_log_index: LogIndex::ZERO,
            last_log_term: Term::ZERO,
        });
        node.receive(NodeId(2), &req.encode()).unwrap();

        let frames = drain_frames(&queue);
        match Message::decode(&frames[0].frame).unwrap() {
            Message::RequestVoteResponse(resp) => {
                assert!(!resp.vote_granted);
                assert_eq!(resp.term, Term(1));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_vote_rejected_for_stale_log() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();
        // Give this node a log entry via a fake term-1 leader.
        crate::testutil::feed_entries(&mut node, NodeId(1), Term(1), &[b"x"]);
        drain_frames(&queue);

        // Candidate at a fresh term but with an empty log.
        let req = Message::RequestVote(RequestVote {
            term: Term(2),
            candidate_id: NodeId(2),
            last_log_index: LogIndex::ZERO,
            last_log_term: Term::ZERO,
        });
        node.receive(NodeId(2), &req.encode()).unwrap();

        let frames = drain_frames(&queue);
        match Message::decode(&frames.last().unwrap().frame).unwrap() {
            Message::RequestVoteResponse(resp) => {
                assert!(!resp.vote_granted);
                // Term was still adopted from the request.
                assert_eq!(resp.term, Term(2));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(node.voted_for(), None);
    }

    #[test]
    fn test_vote_is_sticky_within_term() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();

        let vote_for = |candidate: u32| {
            Message::RequestVote(RequestVote {
                term: Term(1),
                candidate_id: NodeId(candidate),
                last_log_index: LogIndex::ZERO,
                last_log_term: Term::ZERO,
            })
        };

        node.receive(NodeId(1), &vote_for(1).encode()).unwrap();
        assert_eq!(node.voted_for(), Some(NodeId(1)));
        drain_frames(&queue);

        // A competing candidate in the same term is refused...
        node.receive(NodeId(2), &vote_for(2).encode()).unwrap();
        let frames = drain_frames(&queue);
        match Message::decode(&frames[0].frame).unwrap() {
            Message::RequestVoteResponse(resp) => assert!(!resp.vote_granted),
            other => panic!("unexpected reply: {other:?}"),
        }

        // ...but the original candidate may ask again (idempotent grant).
        node.receive(NodeId(1), &vote_for(1).encode()).unwrap();
        let frames = drain_frames(&queue);
        match Message::decode(&frames[0].frame).unwrap() {
            Message::RequestVoteResponse(resp) => assert!(resp.vote_granted),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_prevote_round_does_not_bump_terms() {
        let (mut node, queue) = test_node_prevote(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap();

        assert_eq!(node.role(), Role::PreCandidate);
        assert_eq!(node.current_term(), Term::ZERO);

        let frames = drain_frames(&queue);
        assert_eq!(frames.len(), 2);
        match Message::decode(&frames[0].frame).unwrap() {
            Message::PreVote(req) => assert_eq!(req.term, Term(1)),
            other => panic!("expected PreVote, got {other:?}"),
        }
    }

    #[test]
    fn test_prevote_majority_starts_real_election() {
        let (mut node, queue) = test_node_prevote(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap();
        drain_frames(&queue);

        let grant = Message::PreVoteResponse(crate::rpc::PreVoteResponse {
            term: Term::ZERO,
            vote_granted: true,
        });
        node.receive(NodeId(1), &grant.encode()).unwrap();

        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.current_term(), Term(1));
    }

    #[test]
    fn test_prevote_rejection_drops_to_follower() {
        let (mut node, _queue) = test_node_prevote(0, 3);
        node.start().unwrap();
        node.tick(300).unwrap();

        let reject = Message::PreVoteResponse(crate::rpc::PreVoteResponse {
            term: Term::ZERO,
            vote_granted: false,
        });
        node.receive(NodeId(1), &reject.encode()).unwrap();

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), Term::ZERO);
    }

    #[test]
    fn test_prevote_receiver_refuses_while_leader_is_live() {
        let (mut node, queue) = test_node(0, 3);
        node.start().unwrap();
        // Hear a heartbeat from leader 1 so the leader is "live".
        crate::testutil::feed_entries(&mut node, NodeId(1), Term(1), &[]);
        drain_frames(&queue);

        let req = Message::PreVote(PreVote {
            term: Term(2),
            candidate_id: NodeId(2),
            last_log_index: LogIndex(100),
            last_log_term: Term(1),
        });
        node.receive(NodeId(2), &req.encode()).unwrap();

        let frames = drain_frames(&queue);
        match Message::decode(&frames[0].frame).unwrap() {
            Message::PreVoteResponse(resp) => {
                assert!(!resp.vote_granted);
                // And crucially the term did not move.
                assert_eq!(node.current_term(), Term(1));
                assert_eq!(node.voted_for(), None);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_timeout_now_starts_immediate_election() {
        let (mut node, _queue) = test_node(1, 3);
        node.start().unwrap();
        assert_eq!(node.role(), Role::Follower);

        let msg = Message::TimeoutNow(TimeoutNow {
            term: Term::ZERO,
            leader_id: NodeId(0),
        });
        node.receive(NodeId(0), &msg.encode()).unwrap();

        assert_eq!(node.role(), Role::Candidate);
        assert_eq!(node.current_term(), Term(1));
    }

    fn test_node_prevote(id: u32, n: u32) -> (crate::Raft, crate::transport::FrameQueue) {
        crate::testutil::test_node_with(id, n, |config| config.prevote_enabled = true)
    }
}
