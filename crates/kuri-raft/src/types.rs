//! Core Raft types: terms, log indexes, node ids, entries, roles.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raft term number (monotonically increasing).
///
/// Terms are Raft's logical clock. Each term has at most one leader; every
/// election increments the term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Log index (1-based, 0 is the sentinel for "before the log").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogIndex(pub u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn prev(self) -> LogIndex {
        LogIndex(self.0.saturating_sub(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Node identifier, unique across the cluster.
///
/// Bootstrap clusters number their voters `0..num_nodes`; membership changes
/// may introduce arbitrary ids later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Replica role.
///
/// `PreCandidate` is the PreVote probing state: the node canvasses the
/// cluster with `term + 1` without actually incrementing its term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::PreCandidate => write!(f, "PreCandidate"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

/// What a log entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Opaque command for the state machine.
    Command,
    /// Cluster membership change, applied by every replica.
    Config,
    /// Empty entry; commits but is never handed to the state machine.
    Noop,
}

impl EntryKind {
    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            EntryKind::Command => 0,
            EntryKind::Config => 1,
            EntryKind::Noop => 2,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<EntryKind> {
        match tag {
            0 => Some(EntryKind::Command),
            1 => Some(EntryKind::Config),
            2 => Some(EntryKind::Noop),
            _ => None,
        }
    }
}

/// A log entry: immutable once replicated to a majority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: Term,
    pub index: LogIndex,
    pub kind: EntryKind,
    pub payload: Bytes,
}

impl Entry {
    pub fn new(term: Term, index: LogIndex, kind: EntryKind, payload: Bytes) -> Self {
        Self {
            term,
            index,
            kind,
            payload,
        }
    }
}
