//! Shared helpers for unit tests: single nodes wired to an in-memory frame
//! queue, a recording state machine, and shortcuts for common protocol moves.

#![cfg(test)]

use crate::config::RaftConfig;
use crate::error::Result;
use crate::raft::Raft;
use crate::rpc::{AppendEntries, Message, RequestVoteResponse};
use crate::transport::{FrameQueue, QueueTransport, QueuedFrame, StateMachine, Transport};
use crate::types::{Entry, EntryKind, LogIndex, NodeId, Role, Term};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::{Arc, Mutex};

/// State machine that records applied commands; snapshots serialize the
/// record so restores can rebuild it.
pub(crate) struct TestStateMachine {
    pub state: Arc<Mutex<Vec<Bytes>>>,
}

impl StateMachine for TestStateMachine {
    fn apply(&mut self, entry: &Entry) {
        self.state.lock().unwrap().push(entry.payload.clone());
    }

    fn snapshot(&mut self) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        let mut buf = BytesMut::new();
        for cmd in state.iter() {
            buf.put_u32_le(cmd.len() as u32);
            buf.put_slice(cmd);
        }
        Ok(buf.freeze())
    }

    fn restore(&mut self, mut data: &[u8]) {
        let mut commands = Vec::new();
        while data.len() >= 4 {
            let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            data = &data[4..];
            if data.len() < len {
                break;
            }
            commands.push(Bytes::copy_from_slice(&data[..len]));
            data = &data[len..];
        }
        *self.state.lock().unwrap() = commands;
    }
}

pub(crate) fn test_node(id: u32, num_nodes: u32) -> (Raft, FrameQueue) {
    test_node_with(id, num_nodes, |_| {})
}

pub(crate) fn test_node_with(
    id: u32,
    num_nodes: u32,
    tweak: impl FnOnce(&mut RaftConfig),
) -> (Raft, FrameQueue) {
    let (node, queue, _state) = test_node_full(id, num_nodes, tweak);
    (node, queue)
}

pub(crate) fn test_node_full(
    id: u32,
    num_nodes: u32,
    tweak: impl FnOnce(&mut RaftConfig),
) -> (Raft, FrameQueue, Arc<Mutex<Vec<Bytes>>>) {
    let mut config = RaftConfig {
        node_id: NodeId(id),
        num_nodes,
        timer_seed: Some(42 + id as u64),
        sync_writes: false,
        ..Default::default()
    };
    tweak(&mut config);

    let queue = QueueTransport::new_queue();
    let transport: Box<dyn Transport> = Box::new(QueueTransport::new(NodeId(id), queue.clone()));
    let state = Arc::new(Mutex::new(Vec::new()));
    let sm: Box<dyn StateMachine> = Box::new(TestStateMachine {
        state: state.clone(),
    });

    let node = Raft::new(config, Some(transport), Some(sm)).unwrap();
    (node, queue, state)
}

pub(crate) fn drain_frames(queue: &FrameQueue) -> Vec<QueuedFrame> {
    queue.lock().unwrap().drain(..).collect()
}

/// Start the node (if needed), time it out, and grant it the election.
pub(crate) fn make_leader(node: &mut Raft, queue: &FrameQueue) {
    node.start().unwrap();
    node.tick(300).unwrap();
    assert_eq!(node.role(), Role::Candidate, "expected a candidate after timeout");

    let term = node.current_term();
    let me = node.id();
    for peer in node.voters() {
        if peer == me || node.role() == Role::Leader {
            continue;
        }
        let grant = Message::RequestVoteResponse(RequestVoteResponse {
            term,
            vote_granted: true,
        });
        node.receive(peer, &grant.encode()).unwrap();
    }
    assert_eq!(node.role(), Role::Leader, "expected election to succeed");
    drain_frames(queue);
}

/// Deliver an AppendEntries from a pretend leader, extending the node's log
/// with `cmds` (empty slice = heartbeat).
pub(crate) fn feed_entries(node: &mut Raft, from: NodeId, term: Term, cmds: &[&[u8]]) {
    let prev_log_index = node.log().last_index();
    let prev_log_term = node.log().term_at(prev_log_index);
    let entries = cmds
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            Entry::new(
                term,
                LogIndex(prev_log_index.as_u64() + 1 + i as u64),
                EntryKind::Command,
                Bytes::copy_from_slice(cmd),
            )
        })
        .collect();

    let msg = Message::AppendEntries(AppendEntries {
        term,
        leader_id: from,
        prev_log_index,
        prev_log_term,
        leader_commit: node.commit_index(),
        entries,
    });
    node.receive(from, &msg.encode()).unwrap();
}
