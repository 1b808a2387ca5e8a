//! Transport and state-machine seams.
//!
//! The node never talks to a network or interprets a command itself; both
//! concerns plug in through these traits. `Transport::send` must not block —
//! queuing, retries, and connection management belong to the transport. The
//! node never assumes delivery.

use crate::error::Result;
use crate::types::{Entry, NodeId};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Outbound message path.
pub trait Transport: Send {
    /// Hand an encoded frame to the transport for best-effort delivery.
    fn send(&mut self, peer: NodeId, frame: Bytes);
}

/// The replicated state machine.
///
/// `apply` is invoked synchronously from the apply pump, in index order,
/// exactly once per index; it must not reenter the node.
pub trait StateMachine: Send {
    /// Apply a committed command.
    fn apply(&mut self, entry: &Entry);

    /// Serialize the full state for a snapshot.
    fn snapshot(&mut self) -> Result<Bytes>;

    /// Replace the full state from snapshot bytes.
    fn restore(&mut self, data: &[u8]);
}

/// A frame sitting in the in-memory network.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub from: NodeId,
    pub to: NodeId,
    pub frame: Bytes,
}

/// Shared queue backing [`QueueTransport`]: the whole "network" of an
/// in-process cluster, drained by the test driver.
pub type FrameQueue = Arc<Mutex<VecDeque<QueuedFrame>>>;

/// In-memory transport for in-process clusters and tests.
///
/// Every node's sends land in one shared FIFO; a driver pops frames and
/// forwards them to `Raft::receive`, applying partitions or drops as it
/// pleases.
pub struct QueueTransport {
    local: NodeId,
    queue: FrameQueue,
}

impl QueueTransport {
    pub fn new(local: NodeId, queue: FrameQueue) -> Self {
        Self { local, queue }
    }

    pub fn new_queue() -> FrameQueue {
        Arc::new(Mutex::new(VecDeque::new()))
    }
}

impl Transport for QueueTransport {
    fn send(&mut self, peer: NodeId, frame: Bytes) {
        self.queue.lock().unwrap().push_back(QueuedFrame {
            from: self.local,
            to: peer,
            frame,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_transport_tags_sender_and_receiver() {
        let queue = QueueTransport::new_queue();
        let mut t0 = QueueTransport::new(NodeId(0), queue.clone());
        let mut t1 = QueueTransport::new(NodeId(1), queue.clone());

        t0.send(NodeId(1), Bytes::from_static(b"a"));
        t1.send(NodeId(0), Bytes::from_static(b"b"));

        let mut q = queue.lock().unwrap();
        let first = q.pop_front().unwrap();
        assert_eq!((first.from, first.to), (NodeId(0), NodeId(1)));
        let second = q.pop_front().unwrap();
        assert_eq!((second.from, second.to), (NodeId(1), NodeId(0)));
        assert!(q.is_empty());
    }
}
