//! In-process cluster harness: several nodes sharing one frame queue, with a
//! connectivity matrix for partitions. The driver pumps frames between nodes
//! and checks cross-cutting invariants (commit monotonicity, at most one
//! leader per term) on every delivery round.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use kuri_raft::{
    Entry, FrameQueue, NodeId, QueueTransport, Raft, RaftConfig, Role, StateMachine, Transport,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// State machine that records applied commands for assertions.
pub struct RecordingStateMachine {
    state: Arc<Mutex<Vec<Bytes>>>,
}

impl StateMachine for RecordingStateMachine {
    fn apply(&mut self, entry: &Entry) {
        self.state.lock().unwrap().push(entry.payload.clone());
    }

    fn snapshot(&mut self) -> kuri_raft::Result<Bytes> {
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

pub struct Cluster {
    pub nodes: Vec<Raft>,
    pub states: Vec<Arc<Mutex<Vec<Bytes>>>>,
    pub queue: FrameQueue,
    connected: Vec<Vec<bool>>,
    highest_commit: Vec<u64>,
}

impl Cluster {
    /// A started cluster of `n` nodes with deterministic timer seeds
    /// (base seed 42, offset by node id).
    pub fn new(n: u32) -> Cluster {
        Self::new_with(n, |_, _| {})
    }

    pub fn new_with(n: u32, tweak: impl Fn(u32, &mut RaftConfig)) -> Cluster {
        let queue = QueueTransport::new_queue();
        let mut nodes = Vec::new();
        let mut states = Vec::new();

        for id in 0..n {
            let (node, state) = build_node(id, n, &queue, &tweak);
            nodes.push(node);
            states.push(state);
        }
        for node in &mut nodes {
            node.start().unwrap();
        }

        Cluster {
            connected: vec![vec![true; n as usize]; n as usize],
            highest_commit: vec![0; n as usize],
            nodes,
            states,
            queue,
        }
    }

    /// Instantiate one more node (for membership tests). It is wired to the
    /// same queue and starts as a follower.
    pub fn grow(&mut self, tweak: impl Fn(u32, &mut RaftConfig)) -> NodeId {
        let id = self.nodes.len() as u32;
        let num_nodes = id + 1;
        let (mut node, state) = build_node(id, num_nodes, &self.queue, &tweak);
        node.start().unwrap();
        self.nodes.push(node);
        self.states.push(state);
        for row in &mut self.connected {
            row.push(true);
        }
        self.connected.push(vec![true; num_nodes as usize]);
        self.highest_commit.push(0);
        NodeId(id)
    }

    pub fn node(&self, id: u32) -> &Raft {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: u32) -> &mut Raft {
        &mut self.nodes[id as usize]
    }

    pub fn applied(&self, id: u32) -> Vec<Bytes> {
        self.states[id as usize].lock().unwrap().clone()
    }

    pub fn tick(&mut self, id: u32, ms: u64) {
        let _ = self.nodes[id as usize].tick(ms);
    }

    pub fn tick_all(&mut self, ms: u64) {
        for node in &mut self.nodes {
            let _ = node.tick(ms);
        }
    }

    /// Deliver every queued frame (repeatedly, since handling produces more)
    /// honoring the connectivity matrix. Checks invariants afterwards.
    pub fn deliver_all(&mut self) {
        loop {
            let frame = self.queue.lock().unwrap().pop_front();
            let Some(frame) = frame else { break };
            let (from, to) = (frame.from.as_u32() as usize, frame.to.as_u32() as usize);
            if to >= self.nodes.len() || from >= self.nodes.len() {
                continue; // peer not instantiated in this harness
            }
            if !self.connected[from][to] {
                continue; // partitioned away
            }
            let _ = self.nodes[to].receive(frame.from, &frame.frame);
        }
        self.check_invariants();
    }

    /// Tick everyone and pump messages, `rounds` times.
    pub fn run(&mut self, rounds: usize, ms: u64) {
        for _ in 0..rounds {
            self.tick_all(ms);
            self.deliver_all();
        }
    }

    /// Drive `id` to leadership: time it out, then let the votes flow.
    pub fn elect(&mut self, id: u32) {
        self.tick(id, 300);
        self.deliver_all();
        assert_eq!(
            self.nodes[id as usize].role(),
            Role::Leader,
            "node {id} failed to win its election"
        );
    }

    pub fn isolate(&mut self, id: u32) {
        let id = id as usize;
        for other in 0..self.nodes.len() {
            if other != id {
                self.connected[id][other] = false;
                self.connected[other][id] = false;
            }
        }
    }

    pub fn reconnect(&mut self, id: u32) {
        let id = id as usize;
        for other in 0..self.nodes.len() {
            self.connected[id][other] = true;
            self.connected[other][id] = true;
        }
    }

    /// Split the cluster into two sides that cannot talk to each other.
    pub fn partition(&mut self, side_a: &[u32], side_b: &[u32]) {
        for &a in side_a {
            for &b in side_b {
                self.connected[a as usize][b as usize] = false;
                self.connected[b as usize][a as usize] = false;
            }
        }
    }

    pub fn heal(&mut self) {
        for row in &mut self.connected {
            row.iter_mut().for_each(|c| *c = true);
        }
    }

    pub fn leaders(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leader())
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn check_invariants(&mut self) {
        // Commit index never moves backwards.
        for (i, node) in self.nodes.iter().enumerate() {
            let commit = node.commit_index().as_u64();
            assert!(
                commit >= self.highest_commit[i],
                "commit index of node {i} regressed: {} -> {commit}",
                self.highest_commit[i]
            );
            self.highest_commit[i] = commit;
        }

        // At most one leader per term.
        let mut leader_terms = Vec::new();
        for node in &self.nodes {
            if node.is_leader() {
                let term = node.current_term();
                assert!(
                    !leader_terms.contains(&term),
                    "two leaders in term {term}"
                );
                leader_terms.push(term);
            }
        }
    }
}

fn build_node(
    id: u32,
    num_nodes: u32,
    queue: &FrameQueue,
    tweak: &impl Fn(u32, &mut RaftConfig),
) -> (Raft, Arc<Mutex<Vec<Bytes>>>) {
    let mut config = RaftConfig {
        node_id: NodeId(id),
        num_nodes,
        timer_seed: Some(42 + id as u64),
        sync_writes: false,
        ..Default::default()
    };
    tweak(id, &mut config);

    let transport: Box<dyn Transport> = Box::new(QueueTransport::new(NodeId(id), queue.clone()));
    let state = Arc::new(Mutex::new(Vec::new()));
    let sm: Box<dyn StateMachine> = Box::new(RecordingStateMachine {
        state: state.clone(),
    });
    let node = Raft::new(config, Some(transport), Some(sm)).unwrap();
    (node, state)
}

/// Temp-dir helper: one directory per node id, cleaned up with the guard.
pub struct DataDirs {
    root: tempfile::TempDir,
}

impl DataDirs {
    pub fn new() -> DataDirs {
        DataDirs {
            root: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, id: u32) -> PathBuf {
        self.root.path().join(format!("node{id}"))
    }
}

#[allow(dead_code)]
pub fn commands_equal(cluster: &Cluster, ids: &[u32]) -> bool {
    let first = cluster.applied(ids[0]);
    ids.iter().all(|&id| cluster.applied(id) == first)
}
